//! Certificate Issuance Coordinator
//!
//! Issues, renews, and persists X.509 server certificates from an ACME
//! certificate authority (Let's Encrypt) via DNS-01, storing all key
//! material as append-only versions in a secret vault, with distributed
//! advisory locking to serialize concurrent callers on shared resources.

pub mod acme;
pub mod certificate_service;
pub mod config;
pub mod coordinator;
pub mod dns;
pub mod error;
pub mod key_service;
pub mod lock_manager;
pub mod service;
pub mod vault;

pub use acme::{AcmePort, AcmeError, InstantAcmeClient, IssuedCertificate};
pub use certificate_service::{CertificateError, CertificateService, ValidityReport};
pub use config::EnvConfig;
pub use coordinator::{CoordinatorError, IssueCoordinator, IssueRequest, IssueResponse};
pub use dns::{DnsChallengePort, DnsError, InMemoryDnsChallengePort};
pub use error::{ErrorKind, IssuerError, Result};
pub use key_service::{KeyAlgorithm, KeyError, KeyService, PrivateKey};
pub use lock_manager::{LockError, LockGuard, LockManager};
pub use service::{CertificatesService, DnsProvider, IssueCertificateRequest, IssueCertificateResponse, ServiceError, VaultProvider};
pub use vault::{InMemoryVault, VaultError, VaultErrorKind, VaultPort};
