//! Per-record decide-and-act cycle
//!
//! For every validated record the reconciler looks at the persisted
//! certificate and picks exactly one of: issue (nothing usable on disk),
//! renew (too close to expiry), reissue (subject drifted, opt-in) or keep.
//! Records never affect each other; a failure ends only its own record.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::discovery;
use crate::error::RecordError;
use crate::generator::CertificateGenerator;
use crate::record::ConfigRecord;
use crate::report::{PassReport, RecordReport};
use crate::store::CertificateStore;
use crate::validator::Validator;

/// What a reconciliation did for one record
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No certificate, or an unreadable one, so a new one was written
    Issued,
    /// The certificate was inside the renewal window and was replaced
    Renewed { days_left: f64 },
    /// The certificate was valid but its subject no longer matched the record
    Reissued { days_left: f64 },
    /// Nothing written
    Kept { days_left: f64 },
}

impl Outcome {
    pub fn wrote_certificate(&self) -> bool {
        !matches!(self, Outcome::Kept { .. })
    }
}

/// A successfully reconciled record
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub common_name: String,
    pub outcome: Outcome,
}

/// Reconciles configuration records against a certificate store
pub struct Reconciler<S> {
    store: S,
    generator: CertificateGenerator,
    validator: Validator,
    enforce_subject: bool,
}

impl<S: CertificateStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            generator: CertificateGenerator::new(),
            validator: Validator::default(),
            enforce_subject: false,
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Also regenerate valid certificates whose subject differs from the record
    pub fn enforce_subject(mut self, enforce: bool) -> Self {
        self.enforce_subject = enforce;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decide and act for one validated record
    pub fn reconcile(&self, record: &ConfigRecord) -> Result<Outcome, RecordError> {
        let cn = record.common_name.as_str();

        if !self.store.exists(cn) {
            debug!("{cn}: no certificate on disk");
            self.issue(record)?;
            return Ok(Outcome::Issued);
        }

        let stored = match self.store.inspect(cn) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("{cn}: existing certificate unreadable, regenerating: {e}");
                self.issue(record)?;
                return Ok(Outcome::Issued);
            }
        };

        let days_left = stored.days_left();
        let threshold = f64::from(record.renew_if_expires_in_days);
        debug!("{cn}: {days_left:.2} days left, renewal threshold {threshold}");

        if days_left < threshold {
            info!("{cn}: inside renewal window, renewing");
            self.issue(record)?;
            return Ok(Outcome::Renewed { days_left });
        }

        if self.enforce_subject && stored.subject != record.subject() {
            info!("{cn}: subject differs from configuration, reissuing");
            self.issue(record)?;
            return Ok(Outcome::Reissued { days_left });
        }

        Ok(Outcome::Kept { days_left })
    }

    /// Validate a parsed document and reconcile it
    pub fn reconcile_document(&self, raw: &serde_json::Value) -> Result<Reconciled, RecordError> {
        let record = self.validator.validate(raw)?;
        self.reconcile_record(&record)
    }

    /// Load, validate and reconcile one configuration file
    pub fn reconcile_path(&self, path: &Path) -> RecordReport {
        let result = self
            .prepare(path)
            .and_then(|record| self.reconcile_guarded(&record));
        RecordReport::new(path.to_path_buf(), result)
    }

    /// One sequential pass over `paths`, in order
    pub fn run_pass(&self, paths: &[PathBuf]) -> PassReport {
        paths.iter().map(|path| self.reconcile_path(path)).collect()
    }

    fn prepare(&self, path: &Path) -> Result<ConfigRecord, RecordError> {
        let raw = discovery::load_document(path)?;
        Ok(self.validator.validate(&raw)?)
    }

    fn reconcile_record(&self, record: &ConfigRecord) -> Result<Reconciled, RecordError> {
        let outcome = self.reconcile(record)?;
        Ok(Reconciled {
            common_name: record.common_name.clone(),
            outcome,
        })
    }

    /// A panic in the store or generator fails this record and nothing else.
    fn reconcile_guarded(&self, record: &ConfigRecord) -> Result<Reconciled, RecordError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.reconcile_record(record))).unwrap_or_else(
            |payload| {
                let reason = panic_message(payload.as_ref());
                error!("{}: reconciliation panicked: {reason}", record.common_name);
                Err(RecordError::Aborted(reason))
            },
        )
    }

    fn issue(&self, record: &ConfigRecord) -> Result<(), RecordError> {
        let artifact = self.generator.generate(record)?;
        self.store.write(
            &record.common_name,
            artifact.key_pem.as_bytes(),
            artifact.cert_pem.as_bytes(),
        )?;
        info!(
            "{}: certificate written, valid until {}",
            record.common_name, artifact.not_after
        );
        Ok(())
    }
}

impl<S: CertificateStore + 'static> Reconciler<S> {
    /// A pass that reconciles up to `jobs` common names at once.
    ///
    /// Records sharing a common name stay in one group and run in order, so
    /// writes to a single path never overlap. Reports keep the order of `paths`.
    pub async fn run_pass_concurrent(self: Arc<Self>, paths: Vec<PathBuf>, jobs: usize) -> PassReport {
        let mut slots: Vec<Option<RecordReport>> = paths.iter().map(|_| None).collect();
        let mut groups: BTreeMap<String, Vec<(usize, PathBuf, ConfigRecord)>> = BTreeMap::new();

        for (index, path) in paths.iter().enumerate() {
            match self.prepare(path) {
                Ok(record) => groups
                    .entry(record.common_name.clone())
                    .or_default()
                    .push((index, path.clone(), record)),
                Err(e) => slots[index] = Some(RecordReport::new(path.clone(), Err(e))),
            }
        }

        let permits = Arc::new(Semaphore::new(jobs.max(1)));
        let mut tasks = JoinSet::new();
        for (cn, group) in groups {
            let this = Arc::clone(&self);
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let worked = tokio::task::spawn_blocking(move || {
                    group
                        .into_iter()
                        .map(|(index, path, record)| {
                            (index, RecordReport::new(path, this.reconcile_guarded(&record)))
                        })
                        .collect::<Vec<_>>()
                })
                .await;
                (cn, worked)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(reports))) => {
                    for (index, report) in reports {
                        slots[index] = Some(report);
                    }
                }
                Ok((cn, Err(e))) => error!("{cn}: reconciliation task failed: {e}"),
                Err(e) => error!("Reconciliation task failed: {e}"),
            }
        }

        // Anything still empty belongs to a task that was cancelled.
        slots
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| {
                    RecordReport::new(
                        path,
                        Err(RecordError::Aborted("task did not complete".to_string())),
                    )
                })
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked".to_string()
    }
}
