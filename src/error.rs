//! Error kinds for every stage of a reconciliation pass
//!
//! Each stage fails with its own enum. A per-record report carries a
//! [`RecordError`], so callers branch on the kind instead of unwinding.

use std::path::PathBuf;

/// A configuration document that does not satisfy the required-field schema
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing 'certificate' block")]
    MissingBlock,

    #[error("Missing fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Missing key.size")]
    MissingKeySize,

    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

impl SchemaError {
    pub fn invalid<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// A persisted certificate that cannot be read back. Recovered by regenerating.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("no certificate at {}", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse PEM in {}: {source}", .path.display())]
    Pem {
        path: PathBuf,
        #[source]
        source: pem::PemError,
    },

    #[error("{} holds a '{tag}' block, not a certificate", .path.display())]
    NotACertificate { path: PathBuf, tag: String },

    #[error("invalid X.509 certificate in {}: {reason}", .path.display())]
    X509 { path: PathBuf, reason: String },
}

/// Failure persisting a key/certificate pair
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to create {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure synthesising a keypair or certificate
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("RSA key generation failed: {0}")]
    Key(#[from] rsa::Error),

    #[error("failed to encode private key: {0}")]
    KeyEncoding(String),

    #[error("failed to build certificate: {0}")]
    Certificate(#[from] rcgen::Error),

    #[error("validity of {days} days ends past year 9999")]
    Validity { days: u32 },
}

/// A configuration file that cannot be read or parsed
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("unsupported configuration format '{0}'")]
    UnsupportedFormat(String),
}

/// Everything that can end one record's reconciliation without ending the pass
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("reconciliation aborted: {0}")]
    Aborted(String),
}
