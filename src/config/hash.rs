//! Graph fingerprinting.
//!
//! A fingerprint is the SHA-256 of a graph's canonical JSON. Resources are
//! hashed in identity order, so declaration order does not affect it.

use sha2::{Digest, Sha256};

use crate::error::{Result, StateError};
use crate::resource::{Resource, ResourceGraph};

/// Hasher for computing graph fingerprints.
#[derive(Debug, Default)]
pub struct GraphHasher;

impl GraphHasher {
    /// Creates a new graph hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a whole graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource cannot be serialized.
    pub fn hash_graph(&self, graph: &ResourceGraph) -> Result<String> {
        let mut resources: Vec<&Resource> = graph.iter().collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = Sha256::new();
        for resource in resources {
            hasher.update(self.hash_resource(resource)?.as_bytes());
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Computes the fingerprint of one resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be serialized.
    pub fn hash_resource(&self, resource: &Resource) -> Result<String> {
        // Fields are a BTreeMap, so the JSON is already canonical.
        let canonical = serde_json::to_vec(resource)
            .map_err(|e| StateError::serialization(format!("Failed to serialize {}: {e}", resource.id)))?;

        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Returns the first 8 characters, for display.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}
