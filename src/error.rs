//! Crate-wide error taxonomy
//!
//! 🧯 Every subsystem (vault, ACME, keys, certificates, locking) owns a
//! narrow `thiserror` enum; this module collects them behind a single
//! `IssuerError` so the Coordinator and its callers can match on `kind()`
//! without caring which subsystem produced the failure.

use thiserror::Error;

use crate::acme::AcmeError;
use crate::certificate_service::CertificateError;
use crate::coordinator::CoordinatorError;
use crate::key_service::KeyError;
use crate::lock_manager::LockError;
use crate::service::ServiceError;
use crate::vault::VaultError;

/// The coarse error kind an RPC caller distinguishes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    Backend,
    Acme,
    Crypto,
    Lock,
    Internal,
}

/// Top-level error returned by the Certificate Issuance Coordinator.
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("🚫 invalid argument: {0}")]
    InvalidArgument(String),

    #[error("🗄️ vault backend error: {0}")]
    Vault(#[from] VaultError),

    #[error("🔐 acme error: {0}")]
    Acme(#[from] AcmeError),

    #[error("🔑 key error: {0}")]
    Key(#[from] KeyError),

    #[error("📜 certificate error: {0}")]
    Certificate(#[from] CertificateError),

    #[error("🔒 lock error: {0}")]
    Lock(#[from] LockError),

    #[error("💥 internal error: {0}")]
    Internal(String),
}

impl IssuerError {
    /// The coarse kind callers are expected to branch on (see spec §7).
    pub fn kind(&self) -> ErrorKind {
        match self {
            IssuerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            IssuerError::Vault(_) => ErrorKind::Backend,
            IssuerError::Acme(_) => ErrorKind::Acme,
            IssuerError::Key(_) | IssuerError::Certificate(_) => ErrorKind::Crypto,
            IssuerError::Lock(_) => ErrorKind::Lock,
            IssuerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Flattens a `CoordinatorError` into the crate-wide taxonomy, preserving
/// the same `kind()` that `CoordinatorError::kind()` reports directly —
/// this is the conversion that makes `IssuerError`/`ErrorKind` reachable
/// from the real `IssueCoordinator::issue` call path rather than existing
/// only as an unused parallel taxonomy.
impl From<CoordinatorError> for IssuerError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::InvalidArgument(msg) => IssuerError::InvalidArgument(msg),
            CoordinatorError::Vault(e) => IssuerError::Vault(e),
            CoordinatorError::Lock(e) => IssuerError::Lock(e),
            CoordinatorError::Acme(e) => IssuerError::Acme(e),
            CoordinatorError::Key(e) => IssuerError::Key(e),
        }
    }
}

/// Flattens the RPC-facing `ServiceError` the same way, so a caller that
/// prefers to match on `IssuerError`/`ErrorKind` rather than on
/// `ServiceError::kind()` can convert at the boundary instead.
impl From<ServiceError> for IssuerError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::UnknownVaultProvider(msg) => {
                IssuerError::InvalidArgument(format!("unknown vault provider: {msg}"))
            }
            ServiceError::UnknownDnsProvider(msg) => {
                IssuerError::InvalidArgument(format!("unknown dns provider: {msg}"))
            }
            ServiceError::Coordinator(err) => err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IssuerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_invalid_argument_flows_through_issuer_error() {
        let err: IssuerError = CoordinatorError::InvalidArgument("domains must not be empty".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn coordinator_lock_error_flows_through_issuer_error() {
        let lock_err = crate::lock_manager::LockError::AlreadyLocked("projects/p/secrets/key".into());
        let err: IssuerError = CoordinatorError::Lock(lock_err).into();
        assert_eq!(err.kind(), ErrorKind::Lock);
    }

    #[test]
    fn service_unknown_provider_flows_through_issuer_error() {
        let err: IssuerError = ServiceError::UnknownVaultProvider("aws".into()).into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}
