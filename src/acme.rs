//! ACME protocol client (DNS-01 only)
//!
//! 🔐 Drives RFC 8555 registration, order, DNS-01 challenge, and
//! finalization against a real ACME CA via `instant-acme`. HTTP-01 and
//! TLS-ALPN-01 are non-goals (spec §1) — this module never offers them.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus, RetryPolicy,
};
use thiserror::Error;
use tokio::time::Duration;

use crate::dns::{challenge_record_name, poll_propagation, DnsChallengePort};
use crate::key_service::PrivateKey;

/// ACME directory URLs for Let's Encrypt.
pub mod directory {
    pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
    pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
}

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("terms of service not agreed to")]
    TermsNotAgreed,

    #[error("contact email missing for account registration")]
    EmailMissing,

    #[error("domains list is empty")]
    DomainsEmpty,

    #[error("failed to initialize ACME provider: {0}")]
    ProviderInit(String),

    #[error("account registration failed: {0}")]
    Registration(String),

    #[error("challenge failed: {0}")]
    Challenge(String),

    #[error("certificate obtain/finalize failed: {0}")]
    Obtain(String),
}

/// The bundle an issuance returns (spec §4.2). `cert_key_pem` is
/// authoritative — it overrides the caller-supplied key for persistence
/// whenever the two differ. `instant-acme` generates its own certificate
/// key pair as part of `Order::finalize`, so for this adapter it always
/// differs, and `csr_der` is always empty — the CSR is built and signed
/// internally by the ACME client, never exposed to this crate.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub cert_key_pem: String,
    pub chain_pem: String,
    pub issuer_pem: String,
    pub csr_der: Vec<u8>,
}

/// Port driving registration and DNS-01 issuance against an ACME CA.
///
/// Spec §4.2 models this as a single `issue` operation parameterized by an
/// already-resolved account key. The concrete `instant-acme` client cannot
/// register an account under a caller-supplied private key — `Account::
/// builder`'s `create` always mints its own keypair and returns it bundled
/// into `AccountCredentials` — so this trait splits account resolution out
/// into `ensure_account`, letting the Coordinator's `LoadingAccountKey` step
/// (spec §4.6) still read-or-generate-and-persist opaque account-key bytes
/// without assuming a particular key format (see DESIGN.md's grounding
/// ledger for the full rationale).
#[async_trait]
pub trait AcmePort: Send + Sync {
    /// Restores the account from `existing` bytes if present, otherwise
    /// registers a new one. Returns the canonical bytes to persist.
    async fn ensure_account(&self, existing: Option<&[u8]>) -> Result<Vec<u8>, AcmeError>;

    /// Drives DNS-01 order/challenge/finalize to completion for `domains`.
    /// `cert_key` is accepted for interface symmetry with spec §4.2 but is
    /// not used by this adapter — `instant-acme`'s `finalize()` always
    /// generates its own certificate key pair; the returned
    /// `IssuedCertificate::cert_key_pem` is what must be persisted.
    async fn issue(
        &self,
        account_key: &[u8],
        cert_key: &PrivateKey,
        domains: &[String],
    ) -> Result<IssuedCertificate, AcmeError>;
}

/// `instant-acme`-backed `AcmePort`, bound to a single DNS-01 provider.
pub struct InstantAcmeClient {
    staging: bool,
    email: Option<String>,
    terms_of_service_agreed: bool,
    dns: Arc<dyn DnsChallengePort>,
}

impl InstantAcmeClient {
    pub fn new(
        staging: bool,
        email: Option<String>,
        terms_of_service_agreed: bool,
        dns: Arc<dyn DnsChallengePort>,
    ) -> Self {
        Self {
            staging,
            email,
            terms_of_service_agreed,
            dns,
        }
    }

    fn directory_url(&self) -> &'static str {
        if self.staging {
            directory::LETS_ENCRYPT_STAGING
        } else {
            directory::LETS_ENCRYPT_PRODUCTION
        }
    }

    async fn resolve_account(&self, existing: Option<&[u8]>) -> Result<(Account, Vec<u8>), AcmeError> {
        if let Some(bytes) = existing {
            if let Ok(creds) = serde_json::from_slice::<AccountCredentials>(bytes) {
                let account = Account::builder()
                    .map_err(|e| AcmeError::ProviderInit(e.to_string()))?
                    .from_credentials(creds)
                    .await
                    .map_err(|e| AcmeError::Registration(e.to_string()))?;
                return Ok((account, bytes.to_vec()));
            }
            tracing::warn!("⚠️ stored ACME account credentials did not parse; registering a new account");
        }

        if !self.terms_of_service_agreed {
            return Err(AcmeError::TermsNotAgreed);
        }

        let contact: Vec<String> = self
            .email
            .as_ref()
            .map(|e| vec![format!("mailto:{e}")])
            .ok_or(AcmeError::EmailMissing)?;
        let contact_refs: Vec<&str> = contact.iter().map(String::as_str).collect();

        let (account, creds) = Account::builder()
            .map_err(|e| AcmeError::ProviderInit(e.to_string()))?
            .create(
                &NewAccount {
                    contact: &contact_refs,
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.directory_url().to_string(),
                None,
            )
            .await
            .map_err(|e| AcmeError::Registration(e.to_string()))?;

        tracing::info!("👤 registered new ACME account");
        let bytes = serde_json::to_vec(&creds).map_err(|e| AcmeError::Registration(e.to_string()))?;
        Ok((account, bytes))
    }

    /// Walks the order's authorization stream, publishes a DNS-01 TXT
    /// record for each pending authorization, and marks its challenge
    /// ready. Already-valid authorizations are skipped.
    async fn trigger_challenges(&self, order: &mut Order) -> Result<Vec<String>, AcmeError> {
        let mut record_names = Vec::new();
        let mut authorizations = order.authorizations();

        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(|e| AcmeError::Challenge(e.to_string()))?;

            let identifier = match &authz.identifier {
                Identifier::Dns(d) => d.clone(),
                other => return Err(AcmeError::Challenge(format!("unsupported identifier type: {other:?}"))),
            };

            match authz.status {
                AuthorizationStatus::Valid => {
                    tracing::info!("✅ authorization already valid for {identifier}");
                    continue;
                }
                AuthorizationStatus::Pending => {}
                status => {
                    return Err(AcmeError::Challenge(format!("unexpected authorization status for {identifier}: {status:?}")));
                }
            }

            let mut challenge = authz
                .challenge(ChallengeType::Dns01)
                .ok_or_else(|| AcmeError::Challenge(format!("no DNS-01 challenge offered for {identifier}")))?;

            let txt_value = challenge.key_authorization().dns_value();
            let record_name = challenge_record_name(&identifier);

            self.dns
                .set_txt(&record_name, &txt_value)
                .await
                .map_err(|e| AcmeError::Challenge(e.to_string()))?;

            poll_propagation(self.dns.as_ref(), &record_name, &txt_value, Duration::from_secs(1200))
                .await
                .map_err(|e| AcmeError::Challenge(e.to_string()))?;

            challenge
                .set_ready()
                .await
                .map_err(|e| AcmeError::Challenge(e.to_string()))?;

            tracing::info!("🚀 DNS-01 challenge triggered for {identifier}");
            record_names.push(record_name);
        }

        Ok(record_names)
    }

    async fn cleanup_challenges(&self, record_names: &[String]) {
        for record_name in record_names {
            if let Err(err) = self.dns.clear_txt(record_name).await {
                tracing::warn!("⚠️ failed to clean up TXT record {record_name}: {err}");
            }
        }
    }
}

#[async_trait]
impl AcmePort for InstantAcmeClient {
    async fn ensure_account(&self, existing: Option<&[u8]>) -> Result<Vec<u8>, AcmeError> {
        let (_account, bytes) = self.resolve_account(existing).await?;
        Ok(bytes)
    }

    async fn issue(
        &self,
        account_key: &[u8],
        _cert_key: &PrivateKey,
        domains: &[String],
    ) -> Result<IssuedCertificate, AcmeError> {
        if domains.is_empty() {
            return Err(AcmeError::DomainsEmpty);
        }

        let (account, _) = self.resolve_account(Some(account_key)).await?;

        let identifiers: Vec<Identifier> = domains.iter().map(|d| Identifier::Dns(d.clone())).collect();
        let mut order = account
            .new_order(&NewOrder::new(&identifiers))
            .await
            .map_err(|e| AcmeError::Obtain(format!("failed to create order: {e}")))?;

        tracing::info!("✅ order created for {:?}", domains);

        let record_names = self.trigger_challenges(&mut order).await?;

        let retry_policy = RetryPolicy::default();
        let status = order
            .poll_ready(&retry_policy)
            .await
            .map_err(|e| AcmeError::Obtain(format!("polling order readiness failed: {e}")));

        self.cleanup_challenges(&record_names).await;

        match status? {
            OrderStatus::Ready | OrderStatus::Valid => {}
            other => return Err(AcmeError::Obtain(format!("order ended in state: {other:?}"))),
        }

        let cert_key_pem = order
            .finalize()
            .await
            .map_err(|e| AcmeError::Obtain(format!("failed to finalize order: {e}")))?;

        let chain_pem = order
            .poll_certificate(&retry_policy)
            .await
            .map_err(|e| AcmeError::Obtain(format!("failed to download certificate: {e}")))?;

        let issuer_pem = split_issuer_pem(&chain_pem);

        tracing::info!("🎉 certificate issued for {:?}", domains);

        Ok(IssuedCertificate {
            cert_key_pem,
            chain_pem,
            issuer_pem,
            csr_der: Vec::new(),
        })
    }
}

/// Everything after the first `-----BEGIN CERTIFICATE-----` block in a
/// leaf+issuer chain PEM, i.e. the issuer certificate(s) alone.
fn split_issuer_pem(chain_pem: &str) -> String {
    const MARKER: &str = "-----BEGIN CERTIFICATE-----";
    match chain_pem.match_indices(MARKER).nth(1) {
        Some((idx, _)) => chain_pem[idx..].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_issuer_pem_returns_second_block() {
        let leaf = "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----\n";
        let issuer = "-----BEGIN CERTIFICATE-----\nISSUER\n-----END CERTIFICATE-----\n";
        let chain = format!("{leaf}{issuer}");
        assert_eq!(split_issuer_pem(&chain), issuer);
    }

    #[test]
    fn split_issuer_pem_empty_when_single_cert() {
        let leaf = "-----BEGIN CERTIFICATE-----\nLEAF\n-----END CERTIFICATE-----\n";
        assert_eq!(split_issuer_pem(leaf), "");
    }
}
