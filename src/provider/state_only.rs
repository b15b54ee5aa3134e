//! Operations for types that live only in state.
//!
//! Used for types declared in the project file without an external
//! provider. Nothing outside the state file is touched.

use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

use crate::resource::{Resource, Value};

use super::operations::{OperationResult, ResourceOperations};

/// Records resources in state without calling any external system.
#[derive(Debug, Clone, Default)]
pub struct StateOnlyOperations {
    id_field: Option<String>,
}

impl StateOnlyOperations {
    /// Creates operations that assign a fresh identifier to `id_field` on create.
    #[must_use]
    pub const fn new(id_field: Option<String>) -> Self {
        Self { id_field }
    }
}

#[async_trait]
impl ResourceOperations for StateOnlyOperations {
    async fn create(&self, resource: &Resource) -> OperationResult<Resource> {
        debug!("Recording {} in state", resource.id);
        let Some(id_field) = &self.id_field else {
            return Ok(resource.clone());
        };
        Ok(resource
            .clone()
            .with_field(id_field.clone(), Value::String(Uuid::new_v4().to_string())))
    }

    async fn update(
        &self,
        current: &Resource,
        pending: &Resource,
        changed: &BTreeSet<String>,
    ) -> OperationResult<Resource> {
        debug!("Updating {} in state ({} fields)", pending.id, changed.len());
        let carried = self
            .id_field
            .as_ref()
            .and_then(|field| current.field(field).map(|value| (field.clone(), value.clone())));
        Ok(match carried {
            Some((field, value)) => pending.clone().with_field(field, value),
            None => pending.clone(),
        })
    }

    async fn delete(&self, resource: &Resource) -> OperationResult<()> {
        debug!("Removing {} from state", resource.id);
        Ok(())
    }
}
