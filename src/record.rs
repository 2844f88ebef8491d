//! Configuration record data model

use serde::Deserialize;

/// One validated `certificate` block. Read fresh on every pass, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigRecord {
    pub common_name: String,
    pub organization: String,
    pub organizational_unit: String,
    pub country: String,
    pub state: String,
    pub locality: String,
    pub validity_days: u32,
    pub renew_if_expires_in_days: u32,
    pub key: KeySpec,
}

/// Key parameters nested under `key`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeySpec {
    /// RSA modulus size in bits
    pub size: usize,
}

/// The six distinguished-name attributes a certificate is built from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectFields {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
    pub common_name: String,
}

impl ConfigRecord {
    pub fn subject(&self) -> SubjectFields {
        SubjectFields {
            country: self.country.clone(),
            state: self.state.clone(),
            locality: self.locality.clone(),
            organization: self.organization.clone(),
            organizational_unit: self.organizational_unit.clone(),
            common_name: self.common_name.clone(),
        }
    }
}
