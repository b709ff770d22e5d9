//! Certificate validity inspection and key/cert pairing
//!
//! 📜 `check` reports the validity-window booleans the Coordinator's Decide
//! step needs (spec §4.6); `pair_matches` loads both PEMs the same way a
//! TLS server would (`rustls_pemfile` + `any_supported_type`) and compares
//! SubjectPublicKeyInfo bytes, since building a `CertifiedKey` doesn't
//! itself cross-check the key against the certificate's public key.

use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::CertificateDer;
use thiserror::Error;
use x509_parser::prelude::*;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to parse certificate PEM: {0}")]
    Parse(String),
}

/// The validity-window report spec §4.4 requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityReport {
    pub not_yet: bool,
    pub days_to_start: i64,
    pub expired: bool,
    pub days_to_expire: i64,
}

pub struct CertificateService;

impl CertificateService {
    /// Parses the leaf certificate out of a PEM chain and reports its
    /// validity window relative to now.
    pub fn check(pem: &[u8]) -> Result<ValidityReport, CertificateError> {
        let (_, pem_block) = parse_x509_pem(pem).map_err(|e| CertificateError::Parse(e.to_string()))?;
        let (_, cert) = parse_x509_certificate(&pem_block.contents)
            .map_err(|e| CertificateError::Parse(e.to_string()))?;

        let now = ASN1Time::now();
        let validity = cert.validity();

        let not_yet = validity.not_before > now;
        let expired = validity.not_after <= now;
        let days_to_start = (validity.not_before.timestamp() - now.timestamp()) / 86_400;
        let days_to_expire = (validity.not_after.timestamp() - now.timestamp()) / 86_400;

        Ok(ValidityReport {
            not_yet,
            days_to_start,
            expired,
            days_to_expire,
        })
    }

    /// `true` iff `key_pem` is the private key for `cert_pem`'s public key.
    /// Malformed input yields `Ok(false)` rather than propagating the parse
    /// error — per spec §4.4 a broken pair is a normal Decide-step input,
    /// not an exceptional condition.
    pub fn pair_matches(cert_pem: &[u8], key_pem: &[u8]) -> bool {
        Self::try_pair(cert_pem, key_pem).unwrap_or(false)
    }

    fn try_pair(cert_pem: &[u8], key_pem: &[u8]) -> Result<bool, CertificateError> {
        let mut cert_reader = std::io::Cursor::new(cert_pem);
        let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut cert_reader)
            .filter_map(|r| r.ok())
            .collect();
        if certs.is_empty() {
            return Err(CertificateError::Parse("no certificates in PEM".into()));
        }

        let mut key_reader = std::io::Cursor::new(key_pem);
        let key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| CertificateError::Parse(e.to_string()))?
            .ok_or_else(|| CertificateError::Parse("no private key in PEM".into()))?;

        let signing_key = any_supported_type(&key).map_err(|e| CertificateError::Parse(e.to_string()))?;
        let key_spki = signing_key
            .public_key()
            .ok_or_else(|| CertificateError::Parse("signing key exposes no public key".into()))?
            .as_ref()
            .to_vec();

        let (_, cert) = X509Certificate::from_der(certs[0].as_ref())
            .map_err(|e| CertificateError::Parse(e.to_string()))?;
        let cert_spki = cert.public_key().raw.to_vec();

        Ok(cert_spki == key_spki)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_service::KeyService;
    use rcgen::{CertificateParams, SanType};

    fn self_signed(domain: &str, not_before_days: i64, not_after_days: i64) -> (String, String) {
        let key = KeyService::generate("ecdsa256").unwrap();
        let key_pair = key.to_key_pair().unwrap();
        let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now + time::Duration::days(not_before_days);
        params.not_after = now + time::Duration::days(not_after_days);
        params.subject_alt_names = vec![SanType::DnsName(domain.try_into().unwrap())];
        let cert = params.self_signed(&key_pair).unwrap();
        (cert.pem(), key.pem)
    }

    #[test]
    fn check_reports_valid_certificate() {
        let (cert_pem, _key_pem) = self_signed("example.test", -1, 60);
        let report = CertificateService::check(cert_pem.as_bytes()).unwrap();
        assert!(!report.not_yet);
        assert!(!report.expired);
        assert!(report.days_to_expire > 30);
    }

    #[test]
    fn check_reports_not_yet_valid() {
        let (cert_pem, _key_pem) = self_signed("example.test", 5, 60);
        let report = CertificateService::check(cert_pem.as_bytes()).unwrap();
        assert!(report.not_yet);
    }

    #[test]
    fn check_reports_expired() {
        let (cert_pem, _key_pem) = self_signed("example.test", -60, -1);
        let report = CertificateService::check(cert_pem.as_bytes()).unwrap();
        assert!(report.expired);
    }

    #[test]
    fn pair_matches_true_for_matching_key() {
        let (cert_pem, key_pem) = self_signed("example.test", -1, 60);
        assert!(CertificateService::pair_matches(cert_pem.as_bytes(), key_pem.as_bytes()));
    }

    #[test]
    fn pair_matches_false_for_mismatched_key() {
        let (cert_pem, _key_pem) = self_signed("example.test", -1, 60);
        let other_key = KeyService::generate("ecdsa256").unwrap();
        assert!(!CertificateService::pair_matches(cert_pem.as_bytes(), other_key.pem.as_bytes()));
    }

    #[test]
    fn pair_matches_false_for_garbage() {
        assert!(!CertificateService::pair_matches(b"not a cert", b"not a key"));
    }
}
