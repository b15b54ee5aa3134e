//! State store trait definition.
//!
//! This module defines the contract the engine needs from a state backend:
//! load, persist, and an exclusive lock around each cycle.

use async_trait::async_trait;

use crate::error::Result;

use super::lock::LockInfo;
use super::types::StateSnapshot;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state snapshot.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<StateSnapshot>>;

    /// Persists the state snapshot.
    async fn save(&self, state: &StateSnapshot) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the exclusive lock.
    ///
    /// Fails with a lock error if another holder has it.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock held under `lock_id`.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes the lock with `lock_id` regardless of its holder.
    async fn force_unlock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        (**self).load().await
    }

    async fn save(&self, state: &StateSnapshot) -> Result<()> {
        (**self).save(state).await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn force_unlock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).force_unlock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
