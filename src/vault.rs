//! Versioned secret vault port
//!
//! 🗄️ Abstracts over an external, hierarchical, append-only secret store:
//! conditional vault creation, a label-based advisory lock, and version
//! read/append. The concrete backend (Google Secret Manager, Vault, etc.)
//! is swapped in by providing a different `VaultPort` implementation; the
//! `InMemoryVault` adapter here exists so the Coordinator can be exercised
//! without any network dependency.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// App-specific label key used for the advisory lock, e.g. `certvault-lock`.
pub const LOCK_LABEL_KEY: &str = "certvault-lock";

const VERSIONS_LATEST_SUFFIX: &str = "/versions/latest";
const SECRETS_MARKER: &str = "/secrets/";

/// The coarse failure kind a `VaultPort` call can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultErrorKind {
    /// `resource` did not contain the `/secrets/` marker required to split
    /// it into `(parent, id)`.
    InvalidResource,
    /// `lock` found the label already set to `"true"`.
    AlreadyLocked,
    /// Any other backend failure (network, auth, quota, not-found-on-write).
    Backend,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {cause}")]
pub struct VaultError {
    pub kind: VaultErrorKind,
    pub cause: String,
}

impl VaultError {
    pub fn invalid_resource(resource: impl AsRef<str>) -> Self {
        Self {
            kind: VaultErrorKind::InvalidResource,
            cause: format!("resource {:?} is missing the `/secrets/` marker", resource.as_ref()),
        }
    }

    pub fn already_locked(resource: impl AsRef<str>) -> Self {
        Self {
            kind: VaultErrorKind::AlreadyLocked,
            cause: format!("resource {:?} is already locked", resource.as_ref()),
        }
    }

    pub fn backend(cause: impl std::fmt::Display) -> Self {
        Self {
            kind: VaultErrorKind::Backend,
            cause: cause.to_string(),
        }
    }
}

/// Abstract interface to a versioned secret store.
///
/// *Not found* discipline (spec §9): read operations collapse "not found"
/// into `exists = false`; `add_version` surfaces every backend error,
/// including not-found, because a write against a resource that does not
/// exist is always a caller bug once `create_if_not_exists` has run first.
#[async_trait]
pub trait VaultPort: Send + Sync {
    /// `exists=false` when the backend reports not-found.
    async fn get_if_exists(&self, resource: &str) -> Result<(bool, String), VaultError>;

    /// Idempotent. Splits `resource` at the literal `/secrets/` marker.
    async fn create_if_not_exists(&self, resource: &str) -> Result<(), VaultError>;

    /// Atomically reads the lock label; fails `AlreadyLocked` if already
    /// `"true"`, otherwise sets it to `"true"`. Creates the vault first.
    async fn lock(&self, resource: &str) -> Result<(), VaultError>;

    /// Unconditionally sets the lock label to `"false"`. Creates the vault
    /// first. Callers are expected to log, never propagate, failures here.
    async fn unlock(&self, resource: &str) -> Result<(), VaultError>;

    /// Metadata-only existence check for a version resource.
    async fn get_version_if_exists(&self, version_resource: &str) -> Result<(bool, String), VaultError>;

    /// *Not found* maps to `(false, "", None)` — never an error.
    async fn get_version_data_if_exists(
        &self,
        version_resource: &str,
    ) -> Result<(bool, String, Option<Vec<u8>>), VaultError>;

    /// Appends a new version; returns the canonical version resource name.
    async fn add_version(&self, resource: &str, data: Vec<u8>) -> Result<String, VaultError>;
}

struct VaultEntry {
    labels: HashMap<String, String>,
    versions: Vec<Vec<u8>>,
}

impl VaultEntry {
    fn new() -> Self {
        Self {
            labels: HashMap::new(),
            versions: Vec::new(),
        }
    }
}

/// In-memory reference `VaultPort`, used by tests and local/dev runs.
///
/// Mirrors the `/secrets/` splitting rule and the read-modify-write label
/// race of the Google Secret Manager backend this was modeled on, rather
/// than inventing stricter semantics the real backend can't provide.
pub struct InMemoryVault {
    entries: Arc<RwLock<HashMap<String, VaultEntry>>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn split_resource(resource: &str) -> Result<(&str, &str), VaultError> {
        resource
            .split_once(SECRETS_MARKER)
            .map(|(parent, id)| (parent, id))
            .ok_or_else(|| VaultError::invalid_resource(resource))
    }

    fn version_resource_to_resource(version_resource: &str) -> Result<&str, VaultError> {
        version_resource
            .strip_suffix(VERSIONS_LATEST_SUFFIX)
            .ok_or_else(|| VaultError::backend(format!(
                "unsupported version resource {:?}: only `.../versions/latest` is addressable",
                version_resource
            )))
    }
}

impl Default for InMemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VaultPort for InMemoryVault {
    async fn get_if_exists(&self, resource: &str) -> Result<(bool, String), VaultError> {
        let entries = self.entries.read().await;
        if entries.contains_key(resource) {
            Ok((true, resource.to_string()))
        } else {
            Ok((false, String::new()))
        }
    }

    async fn create_if_not_exists(&self, resource: &str) -> Result<(), VaultError> {
        let (_, _) = Self::split_resource(resource)?;
        let mut entries = self.entries.write().await;
        entries.entry(resource.to_string()).or_insert_with(VaultEntry::new);
        Ok(())
    }

    async fn lock(&self, resource: &str) -> Result<(), VaultError> {
        self.create_if_not_exists(resource).await?;
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(resource).expect("created above");
        if entry.labels.get(LOCK_LABEL_KEY).map(String::as_str) == Some("true") {
            return Err(VaultError::already_locked(resource));
        }
        entry.labels.insert(LOCK_LABEL_KEY.to_string(), "true".to_string());
        Ok(())
    }

    async fn unlock(&self, resource: &str) -> Result<(), VaultError> {
        self.create_if_not_exists(resource).await?;
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(resource).expect("created above");
        entry.labels.insert(LOCK_LABEL_KEY.to_string(), "false".to_string());
        Ok(())
    }

    async fn get_version_if_exists(&self, version_resource: &str) -> Result<(bool, String), VaultError> {
        let resource = Self::version_resource_to_resource(version_resource)?;
        let entries = self.entries.read().await;
        match entries.get(resource) {
            Some(entry) if !entry.versions.is_empty() => {
                let idx = entry.versions.len() - 1;
                Ok((true, format!("{resource}/versions/{idx}")))
            }
            _ => Ok((false, String::new())),
        }
    }

    async fn get_version_data_if_exists(
        &self,
        version_resource: &str,
    ) -> Result<(bool, String, Option<Vec<u8>>), VaultError> {
        let resource = Self::version_resource_to_resource(version_resource)?;
        let entries = self.entries.read().await;
        match entries.get(resource) {
            Some(entry) if !entry.versions.is_empty() => {
                let idx = entry.versions.len() - 1;
                Ok((true, format!("{resource}/versions/{idx}"), Some(entry.versions[idx].clone())))
            }
            _ => Ok((false, String::new(), None)),
        }
    }

    async fn add_version(&self, resource: &str, data: Vec<u8>) -> Result<String, VaultError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(resource)
            .ok_or_else(|| VaultError::backend(format!("add_version: resource {:?} not found", resource)))?;
        entry.versions.push(data);
        let idx = entry.versions.len() - 1;
        Ok(format!("{resource}/versions/{idx}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> &'static str {
        "projects/p/secrets/demo"
    }

    #[tokio::test]
    async fn create_if_not_exists_is_idempotent() {
        let vault = InMemoryVault::new();
        vault.create_if_not_exists(resource()).await.unwrap();
        vault.create_if_not_exists(resource()).await.unwrap();
        let (exists, _) = vault.get_if_exists(resource()).await.unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn create_rejects_resource_without_marker() {
        let vault = InMemoryVault::new();
        let err = vault.create_if_not_exists("nope").await.unwrap_err();
        assert_eq!(err.kind, VaultErrorKind::InvalidResource);
    }

    #[tokio::test]
    async fn lock_then_lock_again_fails() {
        let vault = InMemoryVault::new();
        vault.lock(resource()).await.unwrap();
        let err = vault.lock(resource()).await.unwrap_err();
        assert_eq!(err.kind, VaultErrorKind::AlreadyLocked);

        vault.unlock(resource()).await.unwrap();
        vault.lock(resource()).await.unwrap();
    }

    #[tokio::test]
    async fn version_data_not_found_is_not_an_error() {
        let vault = InMemoryVault::new();
        let (exists, version_resource, data) = vault
            .get_version_data_if_exists(&format!("{}/versions/latest", resource()))
            .await
            .unwrap();
        assert!(!exists);
        assert_eq!(version_resource, "");
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn add_version_then_read_latest() {
        let vault = InMemoryVault::new();
        vault.create_if_not_exists(resource()).await.unwrap();
        let v1 = vault.add_version(resource(), b"one".to_vec()).await.unwrap();
        let v2 = vault.add_version(resource(), b"two".to_vec()).await.unwrap();
        assert_ne!(v1, v2);

        let (exists, canonical, data) = vault
            .get_version_data_if_exists(&format!("{}/versions/latest", resource()))
            .await
            .unwrap();
        assert!(exists);
        assert_eq!(canonical, v2);
        assert_eq!(data.unwrap(), b"two");
    }

    #[tokio::test]
    async fn add_version_on_missing_resource_is_an_error() {
        let vault = InMemoryVault::new();
        let err = vault.add_version(resource(), b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.kind, VaultErrorKind::Backend);
    }
}
