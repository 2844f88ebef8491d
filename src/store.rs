//! Persisted certificate/key pairs, keyed by common name
//!
//! Layout: `<root>/<common_name>/key.pem` and `<root>/<common_name>/cert.pem`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::x509::{AttributeTypeAndValue, X509Name};

use crate::error::{ReadError, StoreError};
use crate::record::SubjectFields;

pub const KEY_FILE: &str = "key.pem";
pub const CERT_FILE: &str = "cert.pem";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// What a persisted certificate says about itself
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub subject: SubjectFields,
    pub issuer: SubjectFields,
    pub dns_names: Vec<String>,
    pub serial: Vec<u8>,
}

impl StoredCertificate {
    /// Fractional days until `not_after`, negative once expired
    pub fn days_left_at(&self, now: OffsetDateTime) -> f64 {
        (self.not_after - now).as_seconds_f64() / SECONDS_PER_DAY
    }

    pub fn days_left(&self) -> f64 {
        self.days_left_at(OffsetDateTime::now_utc())
    }
}

/// Storage backend for certificate/key pairs
pub trait CertificateStore: Send + Sync {
    /// Whether a certificate is present for `common_name`
    fn exists(&self, common_name: &str) -> bool;

    /// Parse the persisted certificate for `common_name`
    fn inspect(&self, common_name: &str) -> Result<StoredCertificate, ReadError>;

    /// Replace the key and certificate for `common_name` wholesale
    fn write(&self, common_name: &str, key_pem: &[u8], cert_pem: &[u8])
    -> Result<(), StoreError>;

    /// Remaining validity in fractional days
    fn read_expiry(&self, common_name: &str) -> Result<f64, ReadError> {
        self.inspect(common_name).map(|cert| cert.days_left())
    }
}

/// Filesystem-backed store rooted at the certs directory
#[derive(Debug, Clone)]
pub struct FsCertificateStore {
    root: PathBuf,
}

impl FsCertificateStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir_for(&self, common_name: &str) -> PathBuf {
        self.root.join(common_name)
    }

    pub fn cert_path(&self, common_name: &str) -> PathBuf {
        self.dir_for(common_name).join(CERT_FILE)
    }

    pub fn key_path(&self, common_name: &str) -> PathBuf {
        self.dir_for(common_name).join(KEY_FILE)
    }
}

impl CertificateStore for FsCertificateStore {
    fn exists(&self, common_name: &str) -> bool {
        self.cert_path(common_name).is_file()
    }

    fn inspect(&self, common_name: &str) -> Result<StoredCertificate, ReadError> {
        let path = self.cert_path(common_name);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReadError::Missing(path));
            }
            Err(source) => return Err(ReadError::Io { path, source }),
        };
        parse_certificate_pem(&path, &contents)
    }

    fn write(
        &self,
        common_name: &str,
        key_pem: &[u8],
        cert_pem: &[u8],
    ) -> Result<(), StoreError> {
        let dir = self.dir_for(common_name);
        fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let key_path = self.key_path(common_name);
        let cert_path = self.cert_path(common_name);

        // Both files are staged before either is swapped in, and the key goes
        // first. If the certificate swap fails the previous key is put back,
        // so the pair on disk always matches.
        let key_tmp = stage(&dir, &key_path, key_pem, true)?;
        let cert_tmp = stage(&dir, &cert_path, cert_pem, false)?;
        let previous_key = fs::read(&key_path).ok();

        persist(key_tmp, &key_path)?;
        if let Err(e) = persist(cert_tmp, &cert_path) {
            restore_key(&dir, &key_path, previous_key.as_deref());
            return Err(e);
        }
        debug!("Wrote key and certificate under {}", dir.display());
        Ok(())
    }
}

fn write_error(dest: &Path) -> impl Fn(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Write {
        path: dest.to_path_buf(),
        source,
    }
}

/// Write `data` to a synced temporary file next to `dest`
fn stage(dir: &Path, dest: &Path, data: &[u8], private: bool) -> Result<NamedTempFile, StoreError> {
    let err = write_error(dest);

    let mut tmp = NamedTempFile::new_in(dir).map_err(&err)?;
    tmp.write_all(data).map_err(&err)?;
    tmp.flush().map_err(&err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if private {
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(&err)?;
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    tmp.as_file().sync_all().map_err(&err)?;
    Ok(tmp)
}

fn persist(tmp: NamedTempFile, dest: &Path) -> Result<(), StoreError> {
    tmp.persist(dest)
        .map(drop)
        .map_err(|e| write_error(dest)(e.error))
}

fn restore_key(dir: &Path, key_path: &Path, previous: Option<&[u8]>) {
    let restored = match previous {
        Some(old) => stage(dir, key_path, old, true).and_then(|tmp| persist(tmp, key_path)),
        None => fs::remove_file(key_path).map_err(write_error(key_path)),
    };
    if let Err(e) = restored {
        warn!("Could not roll back {}: {e}", key_path.display());
    }
}

/// Parse a PEM-armoured X.509 certificate. `origin` only labels errors.
pub fn parse_certificate_pem(origin: &Path, contents: &[u8]) -> Result<StoredCertificate, ReadError> {
    let block = pem::parse(contents).map_err(|source| ReadError::Pem {
        path: origin.to_path_buf(),
        source,
    })?;
    if block.tag() != "CERTIFICATE" {
        return Err(ReadError::NotACertificate {
            path: origin.to_path_buf(),
            tag: block.tag().to_string(),
        });
    }

    let x509_err = |reason: String| ReadError::X509 {
        path: origin.to_path_buf(),
        reason,
    };
    let (_, cert) = x509_parser::parse_x509_certificate(block.contents())
        .map_err(|e| x509_err(e.to_string()))?;
    let dns_names = dns_names(&cert).map_err(x509_err)?;

    let validity = cert.validity();
    Ok(StoredCertificate {
        not_before: validity.not_before.to_datetime(),
        not_after: validity.not_after.to_datetime(),
        subject: subject_fields(cert.subject()),
        issuer: subject_fields(cert.issuer()),
        dns_names,
        serial: cert.raw_serial().to_vec(),
    })
}

fn subject_fields(name: &X509Name<'_>) -> SubjectFields {
    fn first(attr: Option<&AttributeTypeAndValue<'_>>) -> String {
        attr.and_then(|a| a.as_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    SubjectFields {
        country: first(name.iter_country().next()),
        state: first(name.iter_state_or_province().next()),
        locality: first(name.iter_locality().next()),
        organization: first(name.iter_organization().next()),
        organizational_unit: first(name.iter_organizational_unit().next()),
        common_name: first(name.iter_common_name().next()),
    }
}

fn dns_names(cert: &X509Certificate<'_>) -> Result<Vec<String>, String> {
    let san = cert
        .subject_alternative_name()
        .map_err(|e| format!("malformed subjectAltName: {e}"))?;
    Ok(san
        .map(|ext| {
            ext.value
                .general_names
                .iter()
                .filter_map(|name| match name {
                    GeneralName::DNSName(dns) => Some(dns.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default())
}
