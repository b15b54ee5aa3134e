//! Lifecycle hooks around provider operations.
//!
//! A resource type may carry any number of hooks. Each one sees the
//! resource just before and just after the provider call; updates also see
//! the changed-field set. Every method defaults to doing nothing, so a hook
//! implements only what it needs. A hook error fails the step like a
//! provider error.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::resource::Resource;

use super::operations::OperationResult;

/// Callbacks run around create, update and delete.
#[async_trait]
pub trait ModificationHooks: Send + Sync {
    /// Runs before the resource is created. An error prevents the create.
    async fn before_create(&self, _pending: &Resource) -> OperationResult<()> {
        Ok(())
    }

    /// Runs after the resource was created, with provider outputs.
    async fn after_create(&self, _created: &Resource) -> OperationResult<()> {
        Ok(())
    }

    /// Runs before `changed` fields of `current` are updated.
    async fn before_update(
        &self,
        _current: &Resource,
        _pending: &Resource,
        _changed: &BTreeSet<String>,
    ) -> OperationResult<()> {
        Ok(())
    }

    /// Runs after an update, with the updated resource.
    async fn after_update(
        &self,
        _current: &Resource,
        _updated: &Resource,
        _changed: &BTreeSet<String>,
    ) -> OperationResult<()> {
        Ok(())
    }

    /// Runs before the resource is deleted. An error prevents the delete.
    async fn before_delete(&self, _current: &Resource) -> OperationResult<()> {
        Ok(())
    }

    /// Runs after the resource was deleted.
    async fn after_delete(&self, _current: &Resource) -> OperationResult<()> {
        Ok(())
    }
}
