//! Textual per-record report and pass summary

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::RecordError;
use crate::reconciler::{Outcome, Reconciled};

/// Exit status when every record succeeded
pub const EXIT_OK: i32 = 0;
/// Exit status when the pass completed but at least one record failed
pub const EXIT_RECORD_FAILURES: i32 = 2;

/// Result of reconciling one configuration file
#[derive(Debug)]
pub struct RecordReport {
    source: PathBuf,
    result: Result<Reconciled, RecordError>,
}

impl RecordReport {
    pub fn new(source: PathBuf, result: Result<Reconciled, RecordError>) -> Self {
        Self { source, result }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn result(&self) -> &Result<Reconciled, RecordError> {
        &self.result
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.result.as_ref().ok().map(|r| &r.outcome)
    }

    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }
}

impl fmt::Display for RecordReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Ok(Reconciled {
                common_name,
                outcome: Outcome::Kept { days_left },
            }) => write!(f, "{common_name} still valid ({days_left:.2} days left)"),
            Ok(Reconciled { common_name, .. }) => write!(f, "{common_name} certificate generated"),
            Err(e) => write!(f, "ERROR [{}]: {e}", self.source.display()),
        }
    }
}

/// All record reports of one pass, in discovery order
#[derive(Debug, Default)]
pub struct PassReport {
    records: Vec<RecordReport>,
}

impl PassReport {
    pub fn records(&self) -> &[RecordReport] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.records.iter().filter(|r| r.is_failure()).count()
    }

    pub fn written(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome().is_some_and(Outcome::wrote_certificate))
            .count()
    }

    pub fn exit_code(&self) -> i32 {
        if self.failures() == 0 {
            EXIT_OK
        } else {
            EXIT_RECORD_FAILURES
        }
    }

    /// One report line per record
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.records.iter().map(ToString::to_string)
    }
}

impl FromIterator<RecordReport> for PassReport {
    fn from_iter<I: IntoIterator<Item = RecordReport>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
