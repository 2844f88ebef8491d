//! Configuration file discovery and loading
//!
//! Documents are parsed into a format-neutral `serde_json::Value` tree so the
//! validator sees YAML and TOML the same way.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::LoadError;

/// Config files directly inside `dir` whose extension is in `extensions`, sorted by path
pub fn discover(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if !dir.is_dir() {
        warn!("Configuration directory {} does not exist", dir.display());
        return Vec::new();
    }

    let mut found: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry in {}: {e}", dir.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_extension(path, extensions))
        .collect();
    found.sort();

    debug!("Found {} configuration files in {}", found.len(), dir.display());
    found
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Read and parse one configuration document; the format follows the extension
pub fn load_document(path: &Path) -> Result<Value, LoadError> {
    let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match ext.as_str() {
        "yaml" | "yml" => parse_yaml(&text),
        "toml" => Ok(toml::from_str(&text)?),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_yaml(text: &str) -> Result<Value, LoadError> {
    // An empty document is valid YAML; it simply has no certificate block.
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(text)?)
}
