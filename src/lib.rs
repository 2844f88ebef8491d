//! certkeeper: keep a fleet of self-signed certificates in line with their issuance configs
//!
//! Each configuration document declares one certificate. A reconciliation pass
//! validates every document, inspects the persisted certificate for its common
//! name and decides whether to keep it, renew it or issue it from scratch.

pub mod config;
pub mod discovery;
pub mod error;
pub mod generator;
pub mod reconciler;
pub mod record;
pub mod report;
pub mod store;
pub mod validator;

pub use config::Settings;
pub use error::{GenerateError, LoadError, ReadError, RecordError, SchemaError, StoreError};
pub use generator::{CertificateArtifact, CertificateGenerator};
pub use reconciler::{Outcome, Reconciled, Reconciler};
pub use record::{ConfigRecord, KeySpec, SubjectFields};
pub use report::{PassReport, RecordReport};
pub use store::{CertificateStore, FsCertificateStore, StoredCertificate};
pub use validator::Validator;
