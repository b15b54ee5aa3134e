//! Local file-based state storage backend.
//!
//! State lives in `.converge/state.json`. The lock is a separate file
//! created exclusively, so two processes racing for it cannot both win.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{ConvergeError, LockError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::StateSnapshot;

/// Default state directory name.
pub const STATE_DIR: &str = ".converge";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    base_dir: PathBuf,
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store under `.converge` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ConvergeError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Creates a store from a custom state file path.
    ///
    /// The lock file sits next to the state file.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LockError::io(format!("Failed to read lock file: {e}")).into()),
        };

        let lock_info: LockInfo = serde_json::from_str(&content)
            .map_err(|e| LockError::io(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing if it already exists.
    async fn create_lock_file(&self, lock_info: &LockInfo) -> Result<bool> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(LockError::io(format!("Failed to create lock file: {e}")).into()),
        };

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| LockError::io(format!("Failed to write lock file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| LockError::io(format!("Failed to sync lock file: {e}")))?;

        Ok(true)
    }

    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::io(format!("Failed to delete lock file: {e}")).into()),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<StateSnapshot>> {
        if !self.state_path.exists() {
            debug!("No state file found at {}", self.state_path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| StateError::Corrupted {
            message: format!("Failed to read state file: {e}"),
        })?;

        let state: StateSnapshot = serde_json::from_str(&content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state file: {e}"),
        })?;

        debug!(
            "Loaded state for {}/{} with {} resources",
            state.project,
            state.environment,
            state.resources.len()
        );

        Ok(Some(state))
    }

    async fn save(&self, state: &StateSnapshot) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a sibling file first so a crash never leaves a torn state file.
        let temp_path = self.state_path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        info!("State saved to {}", self.state_path.display());
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let lock_info = LockInfo::new(holder);

        if self.create_lock_file(&lock_info).await? {
            info!("Acquired state lock: {}", lock_info.lock_id);
            return Ok(lock_info);
        }

        match self.read_lock_file().await? {
            Some(existing) => Err(LockError::Held {
                holder: existing.holder,
                since: existing.acquired_at.to_rfc3339(),
                lock_id: existing.lock_id,
            }
            .into()),
            // Released between our attempt and the read.
            None => Err(LockError::io("lock file changed while acquiring, retry").into()),
        }
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
                Ok(())
            }
            Some(existing) => {
                warn!(
                    "Lock {lock_id} is not the held lock ({}); leaving it in place",
                    existing.lock_id
                );
                Err(LockError::NotHeld {
                    lock_id: lock_id.to_string(),
                }
                .into())
            }
            None => {
                debug!("No lock to release");
                Ok(())
            }
        }
    }

    async fn force_unlock(&self, lock_id: &str) -> Result<LockInfo> {
        match self.read_lock_file().await? {
            Some(existing) if existing.lock_id == lock_id => {
                self.delete_lock_file().await?;
                warn!("Force-released state lock {lock_id} held by {}", existing.holder);
                Ok(existing)
            }
            _ => Err(LockError::NotHeld {
                lock_id: lock_id.to_string(),
            }
            .into()),
        }
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, ResourceGraph};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());

        let mut state = StateSnapshot::new("demo", "dev");
        let graph = ResourceGraph::from_resources([Resource::new("net::vpc", "main").with_field("cidr", "10.0.0.0/16")])
            .expect("graph");
        state.set_graph(graph, String::from("f00d"));

        store.save(&state).await.expect("save");
        assert!(store.exists().await.expect("exists"));

        let loaded = store.load().await.expect("load").expect("state present");
        assert_eq!(loaded.project, "demo");
        assert_eq!(loaded.fingerprint, "f00d");
        assert_eq!(loaded.resources.len(), 1);
        assert!(!temp_dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_state() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join("nested"));

        assert!(store.load().await.expect("load").is_none());
        assert!(!store.exists().await.expect("exists"));
    }

    #[tokio::test]
    async fn test_corrupted_state() {
        let temp_dir = TempDir::new().expect("temp dir");
        std::fs::write(temp_dir.path().join("state.json"), "{ not json").expect("write");
        let store = LocalStateStore::with_base_dir(temp_dir.path());

        let err = store.load().await.expect_err("corrupted");
        assert!(matches!(err, ConvergeError::State(StateError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());

        let lock = store.acquire_lock("first").await.expect("first lock");
        let err = store.acquire_lock("second").await.expect_err("held");
        match err {
            ConvergeError::Lock(LockError::Held { holder, lock_id, .. }) => {
                assert_eq!(holder, "first");
                assert_eq!(lock_id, lock.lock_id);
            }
            other => panic!("unexpected error: {other}"),
        }

        store.release_lock(&lock.lock_id).await.expect("release");
        assert!(store.get_lock_info().await.expect("info").is_none());
        assert!(store.acquire_lock("second").await.is_ok());
    }

    #[tokio::test]
    async fn test_release_with_wrong_id_keeps_lock() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());

        let lock = store.acquire_lock("holder").await.expect("lock");
        assert!(store.release_lock("other").await.is_err());
        assert_eq!(
            store.get_lock_info().await.expect("info").map(|l| l.lock_id),
            Some(lock.lock_id)
        );
    }

    #[tokio::test]
    async fn test_force_unlock() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());

        let lock = store.acquire_lock("crashed-run").await.expect("lock");
        let err = store.force_unlock("wrong").await.expect_err("wrong id");
        assert!(matches!(err, ConvergeError::Lock(LockError::NotHeld { .. })));

        let removed = store.force_unlock(&lock.lock_id).await.expect("force unlock");
        assert_eq!(removed.holder, "crashed-run");
        assert!(store.get_lock_info().await.expect("info").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_one_winner() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.acquire_lock(&format!("run-{i}")).await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.expect("join").is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_with_state_path() {
        let store = LocalStateStore::with_state_path("/tmp/converge/custom.json");
        assert_eq!(store.state_path(), Path::new("/tmp/converge/custom.json"));
        assert_eq!(store.lock_path, PathBuf::from("/tmp/converge/state.lock"));
    }
}
