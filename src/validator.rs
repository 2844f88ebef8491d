//! Required-field schema check for parsed configuration documents

use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::generator::{MAX_RSA_BITS, MIN_RSA_BITS};
use crate::record::ConfigRecord;

/// Fields every `certificate` block must declare, in report order
pub const REQUIRED_FIELDS: [&str; 9] = [
    "common_name",
    "organization",
    "organizational_unit",
    "country",
    "state",
    "locality",
    "validity_days",
    "renew_if_expires_in_days",
    "key",
];

const STRING_FIELDS: [&str; 6] = [
    "common_name",
    "organization",
    "organizational_unit",
    "country",
    "state",
    "locality",
];

const POSITIVE_FIELDS: [&str; 2] = ["validity_days", "renew_if_expires_in_days"];

/// Turns a raw document tree into a [`ConfigRecord`]. Side-effect free.
#[derive(Debug, Clone)]
pub struct Validator {
    required: Vec<String>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(REQUIRED_FIELDS)
    }
}

impl Validator {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
        }
    }

    /// Validate a whole document (the tree holding the top-level `certificate` key).
    ///
    /// Every missing required field is reported in one error. The nested
    /// `key.size` check only runs once the top-level fields are all present.
    pub fn validate(&self, raw: &Value) -> Result<ConfigRecord, SchemaError> {
        let block = match raw.get("certificate") {
            None | Some(Value::Null) => return Err(SchemaError::MissingBlock),
            Some(Value::Object(map)) if map.is_empty() => return Err(SchemaError::MissingBlock),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(SchemaError::invalid("certificate", "expected a mapping")),
        };

        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|field| !block.contains_key(field.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingFields(missing));
        }

        let key_size = match block.get("key") {
            Some(Value::Object(key)) => key.get("size").ok_or(SchemaError::MissingKeySize)?,
            _ => return Err(SchemaError::MissingKeySize),
        };

        for field in STRING_FIELDS {
            if !block.get(field).is_some_and(Value::is_string) {
                return Err(SchemaError::invalid(field, "expected a string"));
            }
        }
        for field in POSITIVE_FIELDS {
            check_positive(field, block.get(field))?;
        }
        check_positive("key.size", Some(key_size))?;
        check_key_size(key_size)?;

        let record = record_from_block(block)?;
        check_common_name(&record.common_name)?;
        Ok(record)
    }
}

fn check_positive(field: &str, value: Option<&Value>) -> Result<(), SchemaError> {
    match value.and_then(Value::as_u64) {
        Some(n) if n > 0 => Ok(()),
        _ => Err(SchemaError::invalid(field, "expected a positive integer")),
    }
}

fn check_key_size(size: &Value) -> Result<(), SchemaError> {
    let bits = (MIN_RSA_BITS as u64)..=(MAX_RSA_BITS as u64);
    match size.as_u64() {
        Some(n) if bits.contains(&n) => Ok(()),
        _ => Err(SchemaError::invalid(
            "key.size",
            format!("expected between {MIN_RSA_BITS} and {MAX_RSA_BITS} bits"),
        )),
    }
}

fn record_from_block(block: &Map<String, Value>) -> Result<ConfigRecord, SchemaError> {
    serde_json::from_value(Value::Object(block.clone()))
        .map_err(|e| SchemaError::invalid("certificate", e.to_string()))
}

/// The common name keys a directory, so it has to be a single plain path component.
fn check_common_name(cn: &str) -> Result<(), SchemaError> {
    let trimmed = cn.trim();
    if trimmed.is_empty() {
        return Err(SchemaError::invalid("common_name", "must not be empty"));
    }
    if trimmed == "." || trimmed == ".." || cn.contains(['/', '\\']) {
        return Err(SchemaError::invalid(
            "common_name",
            "must be usable as a single directory name",
        ));
    }
    Ok(())
}
