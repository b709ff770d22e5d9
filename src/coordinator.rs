//! Certificate Issuance Coordinator
//!
//! 🎯 The orchestrator: acquires advisory locks, loads-or-generates the ACME
//! account key, decides whether the stored key/certificate pair is still
//! usable, rotates or reuses the key accordingly, drives `AcmePort`, and
//! appends new vault versions in the order `[privateKey, certificate]`.
//! Every exit path releases the locks it acquired.

use std::sync::Arc;

use thiserror::Error;

use crate::acme::AcmePort;
use crate::certificate_service::CertificateService;
use crate::key_service::{KeyService, PrivateKey};
use crate::lock_manager::LockManager;
use crate::vault::VaultPort;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Vault(#[from] crate::vault::VaultError),

    #[error(transparent)]
    Lock(#[from] crate::lock_manager::LockError),

    #[error(transparent)]
    Acme(#[from] crate::acme::AcmeError),

    #[error(transparent)]
    Key(#[from] crate::key_service::KeyError),
}

impl CoordinatorError {
    /// The coarse kind an RPC caller branches on (spec §7) — lets a caller
    /// tell lock contention apart from a vault backend failure or an ACME
    /// error without matching on every subsystem's own error type.
    pub fn kind(&self) -> crate::error::ErrorKind {
        use crate::error::ErrorKind;
        match self {
            CoordinatorError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CoordinatorError::Vault(_) => ErrorKind::Backend,
            CoordinatorError::Lock(_) => ErrorKind::Lock,
            CoordinatorError::Acme(_) => ErrorKind::Acme,
            CoordinatorError::Key(_) => ErrorKind::Crypto,
        }
    }
}

/// Inputs to a single `issue` call (spec §3/§6's `IssueRequest`, minus the
/// `vault_provider`/`dns_provider`/`dns_provider_id` fields — those select
/// which concrete `VaultPort`/`AcmePort` the caller wires in, a decision
/// that happens above this module).
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub acme_account_key_resource: String,
    pub private_key_resource: String,
    pub certificate_resource: String,
    pub email: String,
    pub terms_of_service_agreed: bool,
    pub key_algorithm: String,
    pub renew_private_key: bool,
    pub threshold_of_days_to_expire: i64,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueResponse {
    pub private_key_vault_version_resource: String,
    pub certificate_vault_version_resource: String,
}

pub struct IssueCoordinator {
    vault: Arc<dyn VaultPort>,
    acme: Arc<dyn AcmePort>,
    lock_manager: LockManager,
}

impl IssueCoordinator {
    pub fn new(vault: Arc<dyn VaultPort>, acme: Arc<dyn AcmePort>) -> Self {
        let lock_manager = LockManager::new(vault.clone());
        Self {
            vault,
            acme,
            lock_manager,
        }
    }

    /// Drives the full state machine described in spec §4.6. Locks, once
    /// acquired, are always released before returning, success or failure.
    pub async fn issue(&self, request: IssueRequest) -> Result<IssueResponse, CoordinatorError> {
        Self::validate(&request)?;

        // AcquiringLocks — canonical order prevents deadlock between
        // concurrent callers targeting overlapping resource sets.
        let guard = self
            .lock_manager
            .acquire(&[
                request.acme_account_key_resource.clone(),
                request.private_key_resource.clone(),
                request.certificate_resource.clone(),
            ])
            .await?;

        let result = self.issue_locked(&request).await;
        guard.release().await;
        result
    }

    async fn issue_locked(&self, request: &IssueRequest) -> Result<IssueResponse, CoordinatorError> {
        let account_key = self.load_account_key(&request.acme_account_key_resource).await?;

        let current_key = self.read_latest(&request.private_key_resource).await?;
        let current_cert = self.read_latest(&request.certificate_resource).await?;

        let decision = Self::decide(request, current_key.as_ref(), current_cert.as_ref());

        tracing::info!("🧭 decide: {decision:?} for domains {:?}", request.domains);

        if let Decision::ShortCircuit = decision {
            // current_key/current_cert are both Some here (decide only
            // returns ShortCircuit when both exist and form a valid pair).
            let private_key_version = self.latest_version_resource(&request.private_key_resource).await?;
            let certificate_version = self.latest_version_resource(&request.certificate_resource).await?;
            return Ok(IssueResponse {
                private_key_vault_version_resource: private_key_version,
                certificate_vault_version_resource: certificate_version,
            });
        }

        // RotatingKey (if chosen) persists the tentative key *before*
        // AcmeIssuing: on a subsequent AcmeIssuing failure the next call
        // sees privateKeyExists=true, certificateExists=false and proceeds
        // with the already-rotated key rather than losing it (spec §4.6).
        let (cert_key, mut private_key_vault_version_resource) = match decision {
            Decision::RotateKey => {
                let key = KeyService::generate(&request.key_algorithm)?;
                self.vault.create_if_not_exists(&request.private_key_resource).await?;
                let version = self
                    .vault
                    .add_version(&request.private_key_resource, key.pem.clone().into_bytes())
                    .await?;
                (key, version)
            }
            Decision::ReuseKey => {
                let key = current_key.expect("ReuseKey only chosen when a current key exists");
                let version = self.latest_version_resource(&request.private_key_resource).await?;
                (key, version)
            }
            Decision::ShortCircuit => unreachable!("handled above"),
        };

        let issued = self
            .acme
            .issue(&account_key, &cert_key, &request.domains)
            .await?;

        // Persisting — the authoritative returned key overrides the
        // caller-supplied one if the ACME client substituted it.
        if issued.cert_key_pem != cert_key.pem {
            self.vault.create_if_not_exists(&request.private_key_resource).await?;
            private_key_vault_version_resource = self
                .vault
                .add_version(&request.private_key_resource, issued.cert_key_pem.clone().into_bytes())
                .await?;
        }

        self.vault.create_if_not_exists(&request.certificate_resource).await?;
        let certificate_vault_version_resource = self
            .vault
            .add_version(&request.certificate_resource, issued.chain_pem.clone().into_bytes())
            .await?;

        Ok(IssueResponse {
            private_key_vault_version_resource,
            certificate_vault_version_resource,
        })
    }

    fn validate(request: &IssueRequest) -> Result<(), CoordinatorError> {
        if request.domains.is_empty() {
            return Err(CoordinatorError::InvalidArgument("domains must not be empty".into()));
        }
        if !request.terms_of_service_agreed {
            return Err(CoordinatorError::InvalidArgument("terms_of_service_agreed must be true".into()));
        }
        if request.email.is_empty() {
            return Err(CoordinatorError::InvalidArgument("email must not be empty".into()));
        }
        Ok(())
    }

    /// LoadingAccountKey: read-or-generate-and-persist the opaque
    /// ACME-account credential bytes. A parse failure of an existing
    /// version is logged and treated as "not present" per spec §4.6.
    async fn load_account_key(&self, resource: &str) -> Result<Vec<u8>, CoordinatorError> {
        let version_resource = format!("{resource}/versions/latest");
        let (exists, _canonical, data) = self.vault.get_version_data_if_exists(&version_resource).await?;

        let existing = if exists { data } else { None };

        if let Some(bytes) = &existing {
            match self.acme.ensure_account(Some(bytes)).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    tracing::warn!("⚠️ stored ACME account key at {resource} did not parse ({err}); generating a new one");
                }
            }
        }

        let bytes = self.acme.ensure_account(None).await?;
        self.vault.create_if_not_exists(resource).await?;
        self.vault.add_version(resource, bytes.clone()).await?;
        Ok(bytes)
    }

    /// Reads `resource/versions/latest`; `None` when not present.
    async fn read_latest(&self, resource: &str) -> Result<Option<PrivateKey>, CoordinatorError> {
        let version_resource = format!("{resource}/versions/latest");
        let (exists, _canonical, data) = self.vault.get_version_data_if_exists(&version_resource).await?;
        match (exists, data) {
            (true, Some(bytes)) => Ok(Some(PrivateKey { pem: String::from_utf8_lossy(&bytes).to_string() })),
            _ => Ok(None),
        }
    }

    async fn latest_version_resource(&self, resource: &str) -> Result<String, CoordinatorError> {
        let version_resource = format!("{resource}/versions/latest");
        let (exists, canonical) = self.vault.get_version_if_exists(&version_resource).await?;
        if !exists {
            return Err(CoordinatorError::Vault(crate::vault::VaultError::backend(format!(
                "expected an existing version at {resource} but found none"
            ))));
        }
        Ok(canonical)
    }

    /// Implements the Decide truth table of spec §4.6. `current_key`/
    /// `current_cert` are the PEM payloads (if any) read in LoadingCurrent;
    /// here `current_cert` is reused as the generic "is there a cert PEM"
    /// carrier even though its type is `PrivateKey` (PEM-bytes wrapper).
    fn decide(request: &IssueRequest, current_key: Option<&PrivateKey>, current_cert: Option<&PrivateKey>) -> Decision {
        if request.renew_private_key {
            return Decision::RotateKey;
        }

        let (key, cert) = match (current_key, current_cert) {
            (Some(key), Some(cert)) => (key, cert),
            (None, _) => return Decision::RotateKey,
            (Some(_), None) => return Decision::ReuseKey,
        };

        let pair_broken = !CertificateService::pair_matches(cert.pem.as_bytes(), key.pem.as_bytes())
            || CertificateService::check(cert.pem.as_bytes()).is_err();

        if pair_broken {
            return Decision::RotateKey;
        }

        let valid = match CertificateService::check(cert.pem.as_bytes()) {
            Ok(report) => !report.not_yet && !report.expired && report.days_to_expire > request.threshold_of_days_to_expire,
            Err(_) => false,
        };

        if valid {
            Decision::ShortCircuit
        } else {
            Decision::ReuseKey
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    ShortCircuit,
    RotateKey,
    ReuseKey,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::{AcmeError, IssuedCertificate};
    use crate::vault::InMemoryVault;
    use async_trait::async_trait;
    use rcgen::{CertificateParams, SanType};

    struct StubAcme {
        account_bytes: Vec<u8>,
    }

    #[async_trait]
    impl AcmePort for StubAcme {
        async fn ensure_account(&self, _existing: Option<&[u8]>) -> Result<Vec<u8>, AcmeError> {
            Ok(self.account_bytes.clone())
        }

        async fn issue(
            &self,
            _account_key: &[u8],
            cert_key: &PrivateKey,
            domains: &[String],
        ) -> Result<IssuedCertificate, AcmeError> {
            let key_pair = cert_key.to_key_pair().unwrap();
            let mut params = CertificateParams::new(domains.to_vec()).unwrap();
            params.subject_alt_names = domains
                .iter()
                .map(|d| SanType::DnsName(d.clone().try_into().unwrap()))
                .collect();
            let cert = params.self_signed(&key_pair).unwrap();
            Ok(IssuedCertificate {
                cert_key_pem: cert_key.pem.clone(),
                chain_pem: cert.pem(),
                issuer_pem: String::new(),
                csr_der: vec![],
            })
        }
    }

    fn request() -> IssueRequest {
        IssueRequest {
            acme_account_key_resource: "projects/p/secrets/account".to_string(),
            private_key_resource: "projects/p/secrets/key".to_string(),
            certificate_resource: "projects/p/secrets/cert".to_string(),
            email: "ops@example.test".to_string(),
            terms_of_service_agreed: true,
            key_algorithm: "ed25519".to_string(),
            renew_private_key: false,
            threshold_of_days_to_expire: 30,
            domains: vec!["example.test".to_string()],
        }
    }

    fn coordinator() -> IssueCoordinator {
        let vault: Arc<dyn VaultPort> = Arc::new(InMemoryVault::new());
        let acme: Arc<dyn AcmePort> = Arc::new(StubAcme { account_bytes: b"stub-account".to_vec() });
        IssueCoordinator::new(vault, acme)
    }

    #[tokio::test]
    async fn first_time_issue_generates_everything() {
        let coordinator = coordinator();
        let response = coordinator.issue(request()).await.unwrap();
        assert!(response.private_key_vault_version_resource.ends_with("/versions/0"));
        assert!(response.certificate_vault_version_resource.ends_with("/versions/0"));
    }

    #[tokio::test]
    async fn short_circuits_on_valid_existing_pair() {
        let coordinator = coordinator();
        let req = request();
        let first = coordinator.issue(req.clone()).await.unwrap();
        let second = coordinator.issue(req).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn empty_domains_is_invalid_argument() {
        let coordinator = coordinator();
        let mut req = request();
        req.domains = vec![];
        let err = coordinator.issue(req).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn terms_not_agreed_is_invalid_argument() {
        let coordinator = coordinator();
        let mut req = request();
        req.terms_of_service_agreed = false;
        let err = coordinator.issue(req).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn forced_rotation_always_issues_new_key() {
        let coordinator = coordinator();
        let req = request();
        let first = coordinator.issue(req.clone()).await.unwrap();

        let mut second_req = req;
        second_req.renew_private_key = true;
        let second = coordinator.issue(second_req).await.unwrap();

        assert_ne!(first.private_key_vault_version_resource, second.private_key_vault_version_resource);
        assert_ne!(first.certificate_vault_version_resource, second.certificate_vault_version_resource);
    }

    #[tokio::test]
    async fn lock_contention_surfaces_as_lock_error() {
        let vault: Arc<dyn VaultPort> = Arc::new(InMemoryVault::new());
        let acme: Arc<dyn AcmePort> = Arc::new(StubAcme { account_bytes: b"stub-account".to_vec() });
        let coordinator = IssueCoordinator::new(vault.clone(), acme);

        let req = request();
        vault.lock(&req.private_key_resource).await.unwrap();

        let err = coordinator.issue(req.clone()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Lock(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Lock);

        vault.unlock(&req.private_key_resource).await.unwrap();
        coordinator.issue(req).await.unwrap();
    }
}
