//! The graph provider contract.

use async_trait::async_trait;

use crate::error::Result;

use super::graph::{ResourceGraph, ScopeFilter};

/// Produces the pending resource graph from configuration.
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Evaluates configuration and returns the resources admitted by `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be evaluated.
    async fn resolve(&self, scope: &ScopeFilter) -> Result<ResourceGraph>;
}
