//! Advisory lock acquisition/release with LIFO rollback
//!
//! 🔒 Generalizes the teacher's single-process `AutoHttps::processing`
//! guard set into real cross-process mutual exclusion via
//! `VaultPort::lock`/`unlock`. The advisory-lock race documented in spec §5
//! is accepted as-is: this is a convention-based mutex, not a
//! compare-and-swap.

use std::sync::Arc;

use thiserror::Error;

use crate::vault::{VaultError, VaultErrorKind, VaultPort};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("resource already locked: {0}")]
    AlreadyLocked(String),

    #[error("lock backend error: {0}")]
    Backend(#[from] VaultError),
}

/// A held set of locks. Dropping this without calling [`release`](Self::release)
/// leaks the locks until another caller force-clears them; callers must
/// always invoke `release()`, including on cancellation (spec §5).
pub struct LockGuard {
    vault: Arc<dyn VaultPort>,
    held: Vec<String>,
}

impl LockGuard {
    /// Releases every held lock, LIFO, best-effort: every `unlock` is
    /// attempted even if an earlier one failed, and failures are logged,
    /// never surfaced (spec §4.5).
    pub async fn release(self) {
        for resource in self.held.iter().rev() {
            if let Err(err) = self.vault.unlock(resource).await {
                tracing::warn!("⚠️ failed to release lock on {resource}: {err}");
            }
        }
    }
}

pub struct LockManager {
    vault: Arc<dyn VaultPort>,
}

impl LockManager {
    pub fn new(vault: Arc<dyn VaultPort>) -> Self {
        Self { vault }
    }

    /// Acquires locks on `resources` in the given order. On any failure,
    /// already-collected locks are released immediately (LIFO) and the
    /// error surfaces; re-entrance (acquiring a resource already held by
    /// this call) is not supported.
    pub async fn acquire(&self, resources: &[String]) -> Result<LockGuard, LockError> {
        let mut held = Vec::with_capacity(resources.len());

        for resource in resources {
            if let Err(err) = self.vault.create_if_not_exists(resource).await {
                self.rollback(&held).await;
                return Err(LockError::Backend(err));
            }

            match self.vault.lock(resource).await {
                Ok(()) => held.push(resource.clone()),
                Err(err) => {
                    self.rollback(&held).await;
                    return Err(match err.kind {
                        VaultErrorKind::AlreadyLocked => LockError::AlreadyLocked(resource.clone()),
                        _ => LockError::Backend(err),
                    });
                }
            }
        }

        Ok(LockGuard {
            vault: self.vault.clone(),
            held,
        })
    }

    async fn rollback(&self, held: &[String]) {
        for resource in held.iter().rev() {
            if let Err(err) = self.vault.unlock(resource).await {
                tracing::warn!("⚠️ failed to roll back lock on {resource}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::InMemoryVault;

    fn resources() -> Vec<String> {
        vec![
            "projects/p/secrets/account".to_string(),
            "projects/p/secrets/key".to_string(),
            "projects/p/secrets/cert".to_string(),
        ]
    }

    #[tokio::test]
    async fn acquire_then_release_allows_reacquire() {
        let vault: Arc<dyn VaultPort> = Arc::new(InMemoryVault::new());
        let manager = LockManager::new(vault.clone());

        let guard = manager.acquire(&resources()).await.unwrap();
        guard.release().await;

        manager.acquire(&resources()).await.unwrap();
    }

    #[tokio::test]
    async fn contention_on_second_resource_rolls_back_first() {
        let vault: Arc<dyn VaultPort> = Arc::new(InMemoryVault::new());
        let manager = LockManager::new(vault.clone());
        let contended = resources();

        vault.lock(&contended[1]).await.unwrap();

        let err = manager.acquire(&contended).await.unwrap_err();
        assert!(matches!(err, LockError::AlreadyLocked(_)));

        // the first resource must have been rolled back
        let (exists, _) = vault.get_if_exists(&contended[0]).await.unwrap();
        assert!(exists);
        vault.lock(&contended[0]).await.unwrap();
    }
}
