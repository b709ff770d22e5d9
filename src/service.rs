//! RPC-facing request/response DTOs and provider selection
//!
//! 📬 Mirrors the teacher's wire-shaped structs at the boundary between
//! transport and domain logic. The transport itself (gRPC server, request
//! validation middleware, tracing spans) is out of scope (spec §1); this
//! module only covers what sits between a deserialized request and an
//! `IssueCoordinator` call — provider dispatch and field validation, the
//! way `controller.CertificatesController.Issue` does in the
//! `github.com/newtstat/cloudacme` original this was distilled from.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acme::{AcmePort, InstantAcmeClient};
use crate::coordinator::{CoordinatorError, IssueCoordinator, IssueRequest as CoordinatorIssueRequest, IssueResponse};
use crate::dns::DnsChallengePort;
use crate::vault::VaultPort;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown vault provider: {0:?}")]
    UnknownVaultProvider(String),

    #[error("unknown dns provider: {0:?}")]
    UnknownDnsProvider(String),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

impl ServiceError {
    /// The coarse kind an RPC caller branches on (spec §7): provider
    /// selection failures are invalid-argument, everything else delegates
    /// to the wrapped `CoordinatorError`'s own `kind()`.
    pub fn kind(&self) -> crate::error::ErrorKind {
        use crate::error::ErrorKind;
        match self {
            ServiceError::UnknownVaultProvider(_) | ServiceError::UnknownDnsProvider(_) => ErrorKind::InvalidArgument,
            ServiceError::Coordinator(err) => err.kind(),
        }
    }
}

/// Providers recognized by this deployment. Only `"gcloud"` is implemented
/// (spec §6); unknown values fail fast before any vault/ACME work begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultProvider {
    Gcloud,
}

impl VaultProvider {
    fn parse(value: &str) -> Result<Self, ServiceError> {
        match value {
            "gcloud" => Ok(Self::Gcloud),
            other => Err(ServiceError::UnknownVaultProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsProvider {
    Gcloud,
}

impl DnsProvider {
    fn parse(value: &str) -> Result<Self, ServiceError> {
        match value {
            "gcloud" => Ok(Self::Gcloud),
            other => Err(ServiceError::UnknownDnsProvider(other.to_string())),
        }
    }
}

/// Wire-shaped request (spec §6's `IssueRequest`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCertificateRequest {
    pub vault_provider: String,
    pub dns_provider: String,
    pub dns_provider_id: String,
    pub acme_account_key_vault_resource: String,
    pub private_key_vault_resource: String,
    pub certificate_vault_resource: String,
    pub email: String,
    pub terms_of_service_agreed: bool,
    pub key_algorithm: String,
    pub renew_private_key: bool,
    pub threshold_of_days_to_expire: i64,
    pub domains: Vec<String>,
    pub staging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueCertificateResponse {
    pub private_key_vault_version_resource: String,
    pub certificate_vault_version_resource: String,
}

impl From<IssueResponse> for IssueCertificateResponse {
    fn from(response: IssueResponse) -> Self {
        Self {
            private_key_vault_version_resource: response.private_key_vault_version_resource,
            certificate_vault_version_resource: response.certificate_vault_version_resource,
        }
    }
}

/// Resolves a request's provider strings into live `VaultPort`/`AcmePort`
/// instances and runs the `IssueCoordinator`. Provider construction is
/// injected (`vault_factory`/`acme_factory`) the same way the original's
/// `CertificatesController.issue` takes `newVaultGoogleSecretManagerRepository`/
/// `newLetsEncryptGoogleCloudRepository` as parameters, so tests can swap
/// in in-memory adapters without touching real cloud credentials.
pub struct CertificatesService<VF, AF> {
    vault_factory: VF,
    acme_factory: AF,
}

impl<VF, AF> CertificatesService<VF, AF>
where
    VF: Fn(VaultProvider) -> Arc<dyn VaultPort>,
    AF: Fn(DnsProvider, Arc<dyn DnsChallengePort>, bool, String, bool) -> Arc<dyn AcmePort>,
{
    pub fn new(vault_factory: VF, acme_factory: AF) -> Self {
        Self { vault_factory, acme_factory }
    }

    pub async fn issue(
        &self,
        request: IssueCertificateRequest,
        dns: Arc<dyn DnsChallengePort>,
    ) -> Result<IssueCertificateResponse, ServiceError> {
        let vault_provider = VaultProvider::parse(&request.vault_provider)?;
        let dns_provider = DnsProvider::parse(&request.dns_provider)?;

        let vault = (self.vault_factory)(vault_provider);
        let acme = (self.acme_factory)(
            dns_provider,
            dns,
            request.staging,
            request.email.clone(),
            request.terms_of_service_agreed,
        );

        let coordinator = IssueCoordinator::new(vault, acme);
        let response = coordinator
            .issue(CoordinatorIssueRequest {
                acme_account_key_resource: request.acme_account_key_vault_resource,
                private_key_resource: request.private_key_vault_resource,
                certificate_resource: request.certificate_vault_resource,
                email: request.email,
                terms_of_service_agreed: request.terms_of_service_agreed,
                key_algorithm: request.key_algorithm,
                renew_private_key: request.renew_private_key,
                threshold_of_days_to_expire: request.threshold_of_days_to_expire,
                domains: request.domains,
            })
            .await?;

        Ok(response.into())
    }
}

/// Builds the default, real-network `AcmePort` used outside tests.
pub fn default_acme_factory(
    _dns_provider: DnsProvider,
    dns: Arc<dyn DnsChallengePort>,
    staging: bool,
    email: String,
    terms_of_service_agreed: bool,
) -> Arc<dyn AcmePort> {
    Arc::new(InstantAcmeClient::new(
        staging,
        Some(email).filter(|e| !e.is_empty()),
        terms_of_service_agreed,
        dns,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::InMemoryDnsChallengePort;
    use crate::vault::InMemoryVault;

    fn request() -> IssueCertificateRequest {
        IssueCertificateRequest {
            vault_provider: "gcloud".to_string(),
            dns_provider: "gcloud".to_string(),
            dns_provider_id: "my-project".to_string(),
            acme_account_key_vault_resource: "projects/p/secrets/account".to_string(),
            private_key_vault_resource: "projects/p/secrets/key".to_string(),
            certificate_vault_resource: "projects/p/secrets/cert".to_string(),
            email: "ops@example.test".to_string(),
            terms_of_service_agreed: true,
            key_algorithm: "ed25519".to_string(),
            renew_private_key: false,
            threshold_of_days_to_expire: 30,
            domains: vec!["example.test".to_string()],
            staging: true,
        }
    }

    #[test]
    fn unknown_vault_provider_is_rejected() {
        assert!(VaultProvider::parse("aws").is_err());
    }

    #[test]
    fn unknown_dns_provider_is_rejected() {
        assert!(DnsProvider::parse("aws").is_err());
    }

    #[tokio::test]
    async fn unknown_provider_fails_before_touching_vault_or_acme() {
        let service = CertificatesService::new(
            |_provider| Arc::new(InMemoryVault::new()) as Arc<dyn VaultPort>,
            |_dp, dns: Arc<dyn DnsChallengePort>, staging, email, tos| {
                Arc::new(InstantAcmeClient::new(staging, Some(email), tos, dns)) as Arc<dyn AcmePort>
            },
        );

        let mut req = request();
        req.vault_provider = "aws".to_string();

        let dns: Arc<dyn DnsChallengePort> = Arc::new(InMemoryDnsChallengePort::new());
        let err = service.issue(req, dns).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownVaultProvider(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }
}
