//! Self-signed certificate generation
//!
//! A fresh RSA keypair is generated for every artifact; the certificate is
//! signed with that same key, so subject and issuer are identical.

use log::debug;
use rand::RngCore;
use rand::rngs::OsRng;
use rcgen::string::Ia5String;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType, SerialNumber};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{BigUint, RsaPrivateKey};
use rustls_pki_types::PrivatePkcs8KeyDer;
use time::{Duration, OffsetDateTime};

use crate::error::GenerateError;
use crate::record::ConfigRecord;

pub const RSA_PUBLIC_EXPONENT: u64 = 65_537;

/// Modulus sizes the signing backend accepts
pub const MIN_RSA_BITS: usize = 2048;
pub const MAX_RSA_BITS: usize = 8192;

/// Serial numbers are 20 octets with the sign bit cleared
const SERIAL_LEN: usize = 20;

/// A keypair and its self-signed certificate, both PEM encoded
#[derive(Clone)]
pub struct CertificateArtifact {
    pub common_name: String,
    /// Unencrypted PKCS#1 (`RSA PRIVATE KEY`) PEM
    pub key_pem: String,
    pub cert_pem: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
    pub serial: Vec<u8>,
}

impl std::fmt::Debug for CertificateArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateArtifact")
            .field("common_name", &self.common_name)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Builds self-signed certificates from configuration records
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateGenerator;

impl CertificateGenerator {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, record: &ConfigRecord) -> Result<CertificateArtifact, GenerateError> {
        self.generate_at(record, OffsetDateTime::now_utc())
    }

    /// Generate with an explicit issuance instant; the window is `[now, now + validity_days]`.
    pub fn generate_at(
        &self,
        record: &ConfigRecord,
        now: OffsetDateTime,
    ) -> Result<CertificateArtifact, GenerateError> {
        let not_after = validity_end(now, record.validity_days)?;

        debug!(
            "Generating {}-bit RSA key for {}",
            record.key.size, record.common_name
        );
        let private_key = RsaPrivateKey::new_with_exp(
            &mut OsRng,
            record.key.size,
            &BigUint::from(RSA_PUBLIC_EXPONENT),
        )?;
        let pkcs8 = private_key
            .to_pkcs8_der()
            .map_err(|e| GenerateError::KeyEncoding(e.to_string()))?;
        let key_pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| GenerateError::KeyEncoding(e.to_string()))?;
        let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
            &PrivatePkcs8KeyDer::from(pkcs8.as_bytes()),
            &rcgen::PKCS_RSA_SHA256,
        )?;

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name(record);
        params.subject_alt_names = vec![SanType::DnsName(Ia5String::try_from(
            record.common_name.as_str(),
        )?)];

        let serial = random_serial();
        params.serial_number = Some(SerialNumber::from_slice(&serial));

        params.not_before = now;
        params.not_after = not_after;

        let cert = params.self_signed(&key_pair)?;

        Ok(CertificateArtifact {
            common_name: record.common_name.clone(),
            key_pem: key_pem.as_str().to_owned(),
            cert_pem: cert.pem(),
            not_before: now,
            not_after,
            serial: serial.to_vec(),
        })
    }
}

/// GeneralizedTime stops at year 9999, and so does `time` without `large-dates`.
fn validity_end(now: OffsetDateTime, days: u32) -> Result<OffsetDateTime, GenerateError> {
    now.checked_add(Duration::days(i64::from(days)))
        .filter(|end| end.year() <= 9999)
        .ok_or(GenerateError::Validity { days })
}

fn distinguished_name(record: &ConfigRecord) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, record.country.as_str());
    dn.push(DnType::StateOrProvinceName, record.state.as_str());
    dn.push(DnType::LocalityName, record.locality.as_str());
    dn.push(DnType::OrganizationName, record.organization.as_str());
    dn.push(
        DnType::OrganizationalUnitName,
        record.organizational_unit.as_str(),
    );
    dn.push(DnType::CommonName, record.common_name.as_str());
    dn
}

fn random_serial() -> [u8; SERIAL_LEN] {
    let mut serial = [0u8; SERIAL_LEN];
    OsRng.fill_bytes(&mut serial);
    serial[0] &= 0x7f;
    // never all zero
    serial[SERIAL_LEN - 1] |= 0x01;
    serial
}
