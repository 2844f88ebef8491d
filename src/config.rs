use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Tool settings, passed explicitly to everything that needs a path.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Directory scanned for one config document per certificate
    pub config_dir: PathBuf,
    /// Root of the `<common_name>/{key,cert}.pem` layout
    pub certs_dir: PathBuf,
    /// File extensions treated as configuration documents
    pub extensions: Vec<String>,
    /// Reissue still-valid certificates whose subject drifted from the config
    pub enforce_subject: bool,
    /// Common names reconciled at once; 1 keeps the pass sequential
    pub jobs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("cert_configs"),
            certs_dir: PathBuf::from("certs"),
            extensions: vec!["yaml".to_string(), "yml".to_string(), "toml".to_string()],
            enforce_subject: false,
            jobs: 1,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certkeeper.toml");
        fs::write(&path, "certs_dir = \"/srv/certs\"\njobs = 4\n").unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.certs_dir, PathBuf::from("/srv/certs"));
        assert_eq!(settings.jobs, 4);
        assert_eq!(settings.config_dir, PathBuf::from("cert_configs"));
        assert!(!settings.enforce_subject);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("certkeeper.toml");
        fs::write(&path, "cert_dir = \"typo\"\n").unwrap();

        assert!(Settings::load(&path).is_err());
    }
}
