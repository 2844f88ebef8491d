use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use certkeeper::report::{EXIT_OK, EXIT_RECORD_FAILURES};
use certkeeper::{
    CertificateGenerator, CertificateStore, ConfigRecord, FsCertificateStore, Outcome, ReadError,
    Reconciler, RecordError, StoreError, StoredCertificate, Validator,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn config(cn: &str, validity_days: u32, renew: u32) -> serde_json::Value {
    json!({
        "certificate": {
            "common_name": cn,
            "organization": "Example Corp",
            "organizational_unit": "Platform",
            "country": "US",
            "state": "California",
            "locality": "San Francisco",
            "validity_days": validity_days,
            "renew_if_expires_in_days": renew,
            "key": { "size": 2048 }
        }
    })
}

fn record(cn: &str, validity_days: u32, renew: u32) -> ConfigRecord {
    Validator::default()
        .validate(&config(cn, validity_days, renew))
        .unwrap()
}

fn write_yaml(dir: &Path, name: &str, cn: &str, validity_days: u32, renew: u32) -> PathBuf {
    let path = dir.join(name);
    let body = format!(
        "certificate:\n  common_name: {cn}\n  organization: Example Corp\n  organizational_unit: Platform\n  country: US\n  state: California\n  locality: San Francisco\n  validity_days: {validity_days}\n  renew_if_expires_in_days: {renew}\n  key:\n    size: 2048\n"
    );
    fs::write(&path, body).unwrap();
    path
}

/// Seed the store with a certificate that has `days` of validity left.
fn seed(store: &FsCertificateStore, cn: &str, days: u32) -> StoredCertificate {
    let artifact = CertificateGenerator::new()
        .generate(&record(cn, days, 1))
        .unwrap();
    store
        .write(cn, artifact.key_pem.as_bytes(), artifact.cert_pem.as_bytes())
        .unwrap();
    store.inspect(cn).unwrap()
}

/// Filesystem store that counts writes
struct CountingStore {
    inner: FsCertificateStore,
    writes: Arc<AtomicUsize>,
}

impl CertificateStore for CountingStore {
    fn exists(&self, common_name: &str) -> bool {
        self.inner.exists(common_name)
    }

    fn inspect(&self, common_name: &str) -> Result<StoredCertificate, ReadError> {
        self.inner.inspect(common_name)
    }

    fn write(&self, common_name: &str, key_pem: &[u8], cert_pem: &[u8]) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(common_name, key_pem, cert_pem)
    }
}

/// Filesystem store whose writes panic for one common name
struct PanickingStore {
    inner: FsCertificateStore,
    poisoned: &'static str,
}

impl CertificateStore for PanickingStore {
    fn exists(&self, common_name: &str) -> bool {
        self.inner.exists(common_name)
    }

    fn inspect(&self, common_name: &str) -> Result<StoredCertificate, ReadError> {
        self.inner.inspect(common_name)
    }

    fn write(&self, common_name: &str, key_pem: &[u8], cert_pem: &[u8]) -> Result<(), StoreError> {
        if common_name == self.poisoned {
            panic!("{common_name} blew up");
        }
        self.inner.write(common_name, key_pem, cert_pem)
    }
}

#[test]
fn issues_when_no_certificate_exists() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(FsCertificateStore::new(dir.path()));

    let done = reconciler.reconcile_document(&config("a.test", 30, 10)).unwrap();
    assert_eq!(done.outcome, Outcome::Issued);

    let cert = reconciler.store().inspect("a.test").unwrap();
    assert_eq!(cert.subject.common_name, "a.test");
    assert_eq!(cert.issuer.common_name, "a.test");
    assert_eq!(cert.dns_names, vec!["a.test".to_string()]);
    assert!((cert.days_left() - 30.0).abs() < 0.01);
    assert!(dir.path().join("a.test").join("key.pem").is_file());
}

#[test]
fn renews_inside_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCertificateStore::new(dir.path());
    let old = seed(&store, "a.test", 5);
    let old_key = fs::read(store.key_path("a.test")).unwrap();

    let reconciler = Reconciler::new(store);
    let done = reconciler.reconcile(&record("a.test", 30, 10)).unwrap();
    assert!(matches!(done, Outcome::Renewed { days_left } if days_left < 5.0));

    let new = reconciler.store().inspect("a.test").unwrap();
    assert!(new.not_after > old.not_after);
    assert_ne!(new.serial, old.serial);
    assert_ne!(fs::read(reconciler.store().key_path("a.test")).unwrap(), old_key);
}

#[test]
fn keeps_valid_certificates_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let inner = FsCertificateStore::new(dir.path());
    let before = seed(&inner, "a.test", 20);
    let writes = Arc::new(AtomicUsize::new(0));
    let reconciler = Reconciler::new(CountingStore {
        inner,
        writes: Arc::clone(&writes),
    });

    for _ in 0..3 {
        match reconciler.reconcile(&record("a.test", 30, 10)).unwrap() {
            Outcome::Kept { days_left } => assert!(days_left > 19.99),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(writes.load(Ordering::SeqCst), 0);
    assert_eq!(reconciler.store().inspect("a.test").unwrap().serial, before.serial);
}

#[test]
fn threshold_is_strictly_less_than() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCertificateStore::new(dir.path());
    seed(&store, "a.test", 10);
    let reconciler = Reconciler::new(store);

    // 9.99.. days left against a threshold of 10 renews; against 9 it keeps.
    assert!(matches!(
        reconciler.reconcile(&record("a.test", 30, 9)).unwrap(),
        Outcome::Kept { .. }
    ));
    assert!(matches!(
        reconciler.reconcile(&record("a.test", 30, 10)).unwrap(),
        Outcome::Renewed { .. }
    ));
}

#[test]
fn corrupt_certificate_is_regenerated() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCertificateStore::new(dir.path());
    store.write("a.test", b"junk", b"-----BEGIN CERTIFICATE-----\ngarbage\n").unwrap();

    let reconciler = Reconciler::new(store);
    let done = reconciler.reconcile(&record("a.test", 30, 10)).unwrap();
    assert_eq!(done, Outcome::Issued);
    assert!(reconciler.store().read_expiry("a.test").unwrap() > 29.9);
}

#[test]
fn subject_drift_is_ignored_unless_enforced() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsCertificateStore::new(dir.path());
    seed(&store, "a.test", 30);

    let mut moved = record("a.test", 30, 10);
    moved.locality = "Oakland".to_string();

    let lenient = Reconciler::new(store.clone());
    assert!(matches!(lenient.reconcile(&moved).unwrap(), Outcome::Kept { .. }));

    let strict = Reconciler::new(store).enforce_subject(true);
    assert!(matches!(strict.reconcile(&moved).unwrap(), Outcome::Reissued { .. }));
    assert_eq!(strict.store().inspect("a.test").unwrap().subject.locality, "Oakland");
    assert!(matches!(strict.reconcile(&moved).unwrap(), Outcome::Kept { .. }));
}

#[test]
fn write_failure_ends_only_that_record() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("configs");
    fs::create_dir(&configs).unwrap();
    // A regular file where the certs root should be makes every write fail.
    let blocked = dir.path().join("blocked");
    fs::write(&blocked, "").unwrap();

    let path = write_yaml(&configs, "a.yaml", "a.test", 30, 10);
    let report = Reconciler::new(FsCertificateStore::new(&blocked)).run_pass(&[path]);

    assert_eq!(report.failures(), 1);
    assert!(matches!(
        report.records()[0].result(),
        Err(RecordError::Store(StoreError::CreateDir { .. }))
    ));
}

#[test]
fn scenario_report_lines() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("cert_configs");
    let certs = dir.path().join("certs");
    fs::create_dir(&configs).unwrap();
    let store = FsCertificateStore::new(&certs);

    // fresh
    write_yaml(&configs, "1.yaml", "a.test", 30, 10);
    // five days left, renewed
    write_yaml(&configs, "2.yaml", "b.test", 30, 10);
    seed(&store, "b.test", 5);
    // twenty days left, kept
    write_yaml(&configs, "3.yaml", "c.test", 30, 10);
    seed(&store, "c.test", 20);

    let paths = certkeeper::discovery::discover(&configs, &["yaml".to_string()]);
    let report = Reconciler::new(store).run_pass(&paths);

    let lines: Vec<String> = report.lines().collect();
    assert_eq!(
        lines,
        vec![
            "a.test certificate generated",
            "b.test certificate generated",
            "c.test still valid (20.00 days left)",
        ]
    );
    assert_eq!(report.exit_code(), EXIT_OK);
}

#[test]
fn invalid_configs_do_not_stop_the_pass() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("cert_configs");
    fs::create_dir(&configs).unwrap();

    write_yaml(&configs, "a.yaml", "a.test", 30, 10);
    fs::write(
        configs.join("b.yaml"),
        "certificate:\n  common_name: b.test\n  validity_days: 30\n",
    )
    .unwrap();
    fs::write(configs.join("c.yaml"), "certificate: [oops\n").unwrap();
    write_yaml(&configs, "d.yaml", "d.test", 30, 10);

    let paths = certkeeper::discovery::discover(&configs, &["yaml".to_string()]);
    let report = Reconciler::new(FsCertificateStore::new(dir.path().join("certs"))).run_pass(&paths);

    let lines: Vec<String> = report.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "a.test certificate generated");
    assert_eq!(
        lines[1],
        format!(
            "ERROR [{}]: Missing fields: organization, organizational_unit, country, state, locality, renew_if_expires_in_days, key",
            configs.join("b.yaml").display()
        )
    );
    assert!(
        lines[2].starts_with(&format!("ERROR [{}]: Invalid YAML: ", configs.join("c.yaml").display())),
        "{}",
        lines[2]
    );
    assert_eq!(lines[3], "d.test certificate generated");
    assert_eq!(report.failures(), 2);
    assert_eq!(report.exit_code(), EXIT_RECORD_FAILURES);
}

#[test]
fn second_pass_keeps_everything() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("cert_configs");
    fs::create_dir(&configs).unwrap();
    let paths = vec![
        write_yaml(&configs, "a.yaml", "a.test", 30, 10),
        write_yaml(&configs, "b.yaml", "b.test", 60, 10),
    ];
    let reconciler = Reconciler::new(FsCertificateStore::new(dir.path().join("certs")));

    assert_eq!(reconciler.run_pass(&paths).written(), 2);
    let again = reconciler.run_pass(&paths);
    assert_eq!(again.written(), 0);
    assert!(again.lines().all(|line| line.contains("still valid")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_pass_reports_in_discovery_order() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("cert_configs");
    fs::create_dir(&configs).unwrap();

    write_yaml(&configs, "1.yaml", "c.test", 30, 10);
    write_yaml(&configs, "2.yaml", "a.test", 30, 10);
    fs::write(configs.join("3.yaml"), "nothing: here\n").unwrap();
    // duplicate common name: second record sees the first one's certificate
    write_yaml(&configs, "4.yaml", "c.test", 30, 10);
    write_yaml(&configs, "5.yaml", "b.test", 30, 10);

    let paths = certkeeper::discovery::discover(&configs, &["yaml".to_string()]);
    let reconciler = Arc::new(Reconciler::new(FsCertificateStore::new(dir.path().join("certs"))));
    let report = reconciler.run_pass_concurrent(paths, 3).await;

    let lines: Vec<String> = report.lines().collect();
    assert_eq!(lines.len(), 5);
    assert_eq!(lines[0], "c.test certificate generated");
    assert_eq!(lines[1], "a.test certificate generated");
    assert!(lines[2].ends_with("Missing 'certificate' block"), "{}", lines[2]);
    assert!(lines[3].starts_with("c.test still valid ("), "{}", lines[3]);
    assert_eq!(lines[4], "b.test certificate generated");
    assert_eq!(report.failures(), 1);
}

#[test]
fn out_of_range_validity_fails_only_its_record() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("cert_configs");
    fs::create_dir(&configs).unwrap();
    let far = write_yaml(&configs, "1.yaml", "far.test", 4_000_000, 10);
    write_yaml(&configs, "2.yaml", "a.test", 30, 10);

    let paths = certkeeper::discovery::discover(&configs, &["yaml".to_string()]);
    let reconciler = Reconciler::new(FsCertificateStore::new(dir.path().join("certs")));
    let report = reconciler.run_pass(&paths);

    let lines: Vec<String> = report.lines().collect();
    assert_eq!(
        lines,
        vec![
            format!(
                "ERROR [{}]: validity of 4000000 days ends past year 9999",
                far.display()
            ),
            "a.test certificate generated".to_string(),
        ]
    );
    assert!(!reconciler.store().exists("far.test"));
    assert_eq!(report.exit_code(), EXIT_RECORD_FAILURES);
}

#[test]
fn panicking_store_aborts_only_that_record() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("cert_configs");
    fs::create_dir(&configs).unwrap();
    write_yaml(&configs, "1.yaml", "a.test", 30, 10);
    let boom = write_yaml(&configs, "2.yaml", "boom.test", 30, 10);
    write_yaml(&configs, "3.yaml", "c.test", 30, 10);

    let paths = certkeeper::discovery::discover(&configs, &["yaml".to_string()]);
    let reconciler = Reconciler::new(PanickingStore {
        inner: FsCertificateStore::new(dir.path().join("certs")),
        poisoned: "boom.test",
    });
    let report = reconciler.run_pass(&paths);

    let lines: Vec<String> = report.lines().collect();
    assert_eq!(
        lines,
        vec![
            "a.test certificate generated".to_string(),
            format!(
                "ERROR [{}]: reconciliation aborted: boom.test blew up",
                boom.display()
            ),
            "c.test certificate generated".to_string(),
        ]
    );
    assert_eq!(report.failures(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_pass_survives_a_panicking_group() {
    let dir = tempfile::tempdir().unwrap();
    let configs = dir.path().join("cert_configs");
    fs::create_dir(&configs).unwrap();
    write_yaml(&configs, "1.yaml", "a.test", 30, 10);
    let boom = write_yaml(&configs, "2.yaml", "boom.test", 30, 10);
    write_yaml(&configs, "3.yaml", "c.test", 30, 10);
    let boom_again = write_yaml(&configs, "4.yaml", "boom.test", 30, 10);

    let paths = certkeeper::discovery::discover(&configs, &["yaml".to_string()]);
    let reconciler = Arc::new(Reconciler::new(PanickingStore {
        inner: FsCertificateStore::new(dir.path().join("certs")),
        poisoned: "boom.test",
    }));
    let report = reconciler.run_pass_concurrent(paths, 2).await;

    let lines: Vec<String> = report.lines().collect();
    assert_eq!(
        lines,
        vec![
            "a.test certificate generated".to_string(),
            format!(
                "ERROR [{}]: reconciliation aborted: boom.test blew up",
                boom.display()
            ),
            "c.test certificate generated".to_string(),
            format!(
                "ERROR [{}]: reconciliation aborted: boom.test blew up",
                boom_again.display()
            ),
        ]
    );
    assert!(report.records()[1].result().as_ref().is_err_and(|e| matches!(e, RecordError::Aborted(_))));
    assert_eq!(report.failures(), 2);
}

#[test]
fn custom_validator_applies_to_documents() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::new(FsCertificateStore::new(dir.path()))
        .with_validator(Validator::new(["common_name", "serial_hint"]));

    let err = reconciler
        .reconcile_document(&config("a.test", 30, 10))
        .unwrap_err();
    assert_eq!(err.to_string(), "Missing fields: serial_hint");
    assert!(!reconciler.store().exists("a.test"));
}
