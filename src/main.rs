mod cli;

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use certkeeper::{FsCertificateStore, PassReport, Reconciler, Settings, discovery};
use clap::Parser;
use log::{error, info};

fn main() {
    env_logger::Builder::new()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    match real_main() {
        Ok(report) => {
            for line in report.lines() {
                println!("{line}");
            }
            std::process::exit(report.exit_code());
        }
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

fn real_main() -> Result<PassReport> {
    let args = cli::Args::parse();

    let mut settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(dir) = args.config_dir {
        settings.config_dir = dir;
    }
    if let Some(dir) = args.certs_dir {
        settings.certs_dir = dir;
    }
    if let Some(jobs) = args.jobs {
        settings.jobs = jobs;
    }
    settings.enforce_subject |= args.enforce_subject;

    fs::create_dir_all(&settings.certs_dir).with_context(|| {
        format!(
            "Failed to create certificate directory {}",
            settings.certs_dir.display()
        )
    })?;

    let paths = discovery::discover(&settings.config_dir, &settings.extensions);
    info!(
        "Reconciling {} configuration files from {}",
        paths.len(),
        settings.config_dir.display()
    );

    let reconciler = Reconciler::new(FsCertificateStore::new(&settings.certs_dir))
        .enforce_subject(settings.enforce_subject);

    let report = if settings.jobs > 1 {
        let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        rt.block_on(Arc::new(reconciler).run_pass_concurrent(paths, settings.jobs))
    } else {
        reconciler.run_pass(&paths)
    };

    info!(
        "Pass complete: {} records, {} written, {} failed",
        report.len(),
        report.written(),
        report.failures()
    );
    Ok(report)
}
