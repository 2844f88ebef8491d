use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Keep self-signed certificates in line with their issuance configs"
)]
pub struct Args {
    /// Settings file (TOML)
    #[arg(long, short = 's')]
    pub settings: Option<PathBuf>,

    /// Directory holding one config document per certificate
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// Directory certificates and keys are written under
    #[arg(long)]
    pub certs_dir: Option<PathBuf>,

    /// Reconcile up to N common names at once
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Reissue valid certificates whose subject no longer matches the config
    #[arg(long)]
    pub enforce_subject: bool,
}
