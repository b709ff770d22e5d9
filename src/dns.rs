//! DNS-01 challenge publication port
//!
//! 📡 Abstracts over "put a TXT record under `_acme-challenge.<domain>`,
//! wait for it to propagate, then take it down again" — the only challenge
//! method this coordinator drives (HTTP-01/TLS-ALPN-01 are non-goals).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum DnsError {
    #[error("dns provider error: {0}")]
    Provider(String),

    #[error("timed out waiting for TXT record propagation at {0}")]
    PropagationTimeout(String),
}

/// Computes the `_acme-challenge.<domain>` record name, stripping a leading
/// wildcard label the way the CA expects (`*.example.com` and
/// `example.com` share one challenge record).
pub fn challenge_record_name(domain: &str) -> String {
    format!("_acme-challenge.{}", domain.trim_start_matches("*."))
}

/// Port for publishing and retracting DNS-01 TXT challenge records.
#[async_trait]
pub trait DnsChallengePort: Send + Sync {
    /// Publish `value` under `record_name` (replacing any prior value).
    async fn set_txt(&self, record_name: &str, value: &str) -> Result<(), DnsError>;

    /// Block until `record_name` resolves to `value` (best-effort; a
    /// concrete resolver-backed adapter polls authoritative nameservers).
    async fn wait_propagation(&self, record_name: &str, value: &str) -> Result<(), DnsError>;

    /// Remove the challenge record. Best-effort; callers log failures and
    /// continue rather than fail an otherwise-successful issuance.
    async fn clear_txt(&self, record_name: &str) -> Result<(), DnsError>;
}

/// In-memory `DnsChallengePort`, used by tests and local/dev runs.
///
/// `wait_propagation` returns immediately if the value is already present
/// (there is no real DNS to propagate through), matching the teacher's
/// `MemoryChallengeHandler` pattern of a trivially-fast in-memory stand-in
/// for a real network-backed challenge responder.
pub struct InMemoryDnsChallengePort {
    records: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryDnsChallengePort {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryDnsChallengePort {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsChallengePort for InMemoryDnsChallengePort {
    async fn set_txt(&self, record_name: &str, value: &str) -> Result<(), DnsError> {
        let mut records = self.records.write().await;
        records.insert(record_name.to_string(), value.to_string());
        Ok(())
    }

    async fn wait_propagation(&self, record_name: &str, value: &str) -> Result<(), DnsError> {
        let records = self.records.read().await;
        match records.get(record_name) {
            Some(v) if v == value => Ok(()),
            _ => Err(DnsError::PropagationTimeout(record_name.to_string())),
        }
    }

    async fn clear_txt(&self, record_name: &str) -> Result<(), DnsError> {
        let mut records = self.records.write().await;
        records.remove(record_name);
        Ok(())
    }
}

/// Polls `port.wait_propagation` with backoff until it succeeds or
/// `timeout` elapses. Concrete `DnsChallengePort` adapters that query real
/// nameservers are expected to implement their own internal retry inside
/// `wait_propagation`; this helper exists for adapters (like the in-memory
/// one) whose `wait_propagation` is a single point-in-time check.
pub async fn poll_propagation<P: DnsChallengePort + ?Sized>(
    port: &P,
    record_name: &str,
    value: &str,
    timeout: Duration,
) -> Result<(), DnsError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match port.wait_propagation(record_name, value).await {
            Ok(()) => return Ok(()),
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(_) => return Err(DnsError::PropagationTimeout(record_name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_record_strips_wildcard() {
        assert_eq!(challenge_record_name("*.example.test"), "_acme-challenge.example.test");
        assert_eq!(challenge_record_name("example.test"), "_acme-challenge.example.test");
    }

    #[tokio::test]
    async fn set_then_wait_then_clear() {
        let port = InMemoryDnsChallengePort::new();
        let name = challenge_record_name("example.test");
        port.set_txt(&name, "abc").await.unwrap();
        port.wait_propagation(&name, "abc").await.unwrap();
        port.clear_txt(&name).await.unwrap();
        assert!(port.wait_propagation(&name, "abc").await.is_err());
    }

    #[tokio::test]
    async fn poll_propagation_succeeds_once_value_matches() {
        let port = InMemoryDnsChallengePort::new();
        let name = challenge_record_name("example.test");
        port.set_txt(&name, "abc").await.unwrap();
        poll_propagation(&port, &name, "abc", Duration::from_secs(1)).await.unwrap();
    }
}
