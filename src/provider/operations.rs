//! The capability set every resource type implements.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::resource::Resource;

/// Error returned by a provider operation.
///
/// The engine attributes it to the change and step that raised it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl OperationError {
    /// Creates an error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result of a provider operation.
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Operations the engine may invoke on a resource type.
///
/// The engine only ever sees this interface; it never depends on the
/// concrete type behind it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceOperations: Send + Sync {
    /// Human-readable name of a resource, used in plans and reports.
    fn display_name(&self, resource: &Resource) -> String {
        resource.id.to_string()
    }

    /// Reads the live resource. `None` means it no longer exists.
    async fn refresh(&self, resource: &Resource) -> OperationResult<Option<Resource>> {
        Ok(Some(resource.clone()))
    }

    /// Creates the resource and returns it with provider-assigned outputs.
    async fn create(&self, resource: &Resource) -> OperationResult<Resource>;

    /// Updates exactly the `changed` fields of `current` to match `pending`.
    async fn update(
        &self,
        current: &Resource,
        pending: &Resource,
        changed: &BTreeSet<String>,
    ) -> OperationResult<Resource>;

    /// Deletes the resource.
    async fn delete(&self, resource: &Resource) -> OperationResult<()>;
}
