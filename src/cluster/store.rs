//! Coordination store holding the canonical cluster topology.
//!
//! The membership directory is a thin client over a [`CoordinationStore`]:
//! any consistent store with an atomic compare-and-set keyed by epoch can back
//! it without affecting resolution or rebalancing.
//!
//! # Storage Format (file store)
//!
//! ```text
//! <dir>/
//!   ├── topology.bin    # bincode-encoded ClusterTopology
//!   ├── topology.tmp    # in-flight write, renamed over topology.bin
//!   └── topology.lock   # present while a writer holds the store
//! ```

use crate::error::StoreError;
use crate::partitioning::ClusterTopology;
use crate::types::Epoch;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Persistent home of the single canonical topology.
#[async_trait]
pub trait CoordinationStore: Send + Sync + std::fmt::Debug {
    /// Read the stored topology, `None` if nothing was ever published.
    async fn read(&self) -> Result<Option<ClusterTopology>, StoreError>;

    /// Replace the stored topology if the stored epoch equals `expected_epoch`
    /// (`0` for an empty store). Returns `false` when the epoch did not match.
    async fn compare_and_set(
        &self,
        expected_epoch: Epoch,
        topology: &ClusterTopology,
    ) -> Result<bool, StoreError>;
}

// ============================================================================
// In-Memory Implementation
// ============================================================================

/// In-memory store, shared by every node of a single process.
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    topology: Mutex<Option<ClusterTopology>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryCoordinationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every operation by `latency`, emulating a remote round trip.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Epoch currently stored.
    pub fn epoch(&self) -> Epoch {
        self.topology.lock().as_ref().map(|t| t.epoch()).unwrap_or(0)
    }

    async fn round_trip(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn read(&self) -> Result<Option<ClusterTopology>, StoreError> {
        self.round_trip().await;
        Ok(self.topology.lock().clone())
    }

    async fn compare_and_set(
        &self,
        expected_epoch: Epoch,
        topology: &ClusterTopology,
    ) -> Result<bool, StoreError> {
        self.round_trip().await;

        let mut stored = self.topology.lock();
        let current = stored.as_ref().map(|t| t.epoch()).unwrap_or(0);
        if current != expected_epoch {
            return Ok(false);
        }

        *stored = Some(topology.clone());
        Ok(true)
    }
}

// ============================================================================
// File-Based Implementation (using async tokio::fs)
// ============================================================================

/// File-based store usable by several processes on one host or a shared volume.
///
/// Writers exclude each other with a lock file created via `create_new`; a
/// held lock is reported as [`StoreError::Busy`] so the caller retries.
///
/// Each compare-and-set runs on its own task, so a caller that stops waiting
/// (a store timeout) never leaves the lock behind: the swap finishes and the
/// lock is released regardless.
// TODO: expire lock files left behind by a process that crashed mid-update.
#[derive(Debug, Clone)]
pub struct FileCoordinationStore {
    base_dir: PathBuf,
}

impl FileCoordinationStore {
    /// Open (creating if needed) a store rooted at `base_dir`.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        Ok(Self { base_dir })
    }

    fn topology_path(&self) -> PathBuf {
        self.base_dir.join("topology.bin")
    }

    fn lock_path(&self) -> PathBuf {
        self.base_dir.join("topology.lock")
    }

    /// Atomically write a file (write to temp, then rename).
    async fn atomic_write(&self, path: &Path, content: &[u8]) -> Result<(), StoreError> {
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn read_current(&self) -> Result<Option<ClusterTopology>, StoreError> {
        let mut file = match fs::File::open(self.topology_path()).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;

        let topology: ClusterTopology = bincode::deserialize(&content)
            .map_err(|e| StoreError::Corrupted(format!("failed to decode topology: {}", e)))?;
        Ok(Some(topology.normalize()))
    }

    async fn acquire_lock(&self) -> Result<(), StoreError> {
        let result = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path())
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(StoreError::Busy),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_lock(&self) {
        if let Err(e) = fs::remove_file(self.lock_path()).await {
            tracing::warn!(error = %e, path = ?self.lock_path(), "Failed to release store lock");
        }
    }

    async fn swap_locked(
        &self,
        expected_epoch: Epoch,
        topology: &ClusterTopology,
    ) -> Result<bool, StoreError> {
        let current = self.read_current().await?.map(|t| t.epoch()).unwrap_or(0);
        if current != expected_epoch {
            return Ok(false);
        }

        let content = bincode::serialize(topology)?;
        self.atomic_write(&self.topology_path(), &content).await?;

        tracing::debug!(
            epoch = topology.epoch(),
            path = ?self.topology_path(),
            "Wrote topology"
        );
        Ok(true)
    }
}

#[async_trait]
impl CoordinationStore for FileCoordinationStore {
    async fn read(&self) -> Result<Option<ClusterTopology>, StoreError> {
        self.read_current().await
    }

    async fn compare_and_set(
        &self,
        expected_epoch: Epoch,
        topology: &ClusterTopology,
    ) -> Result<bool, StoreError> {
        let store = self.clone();
        let topology = topology.clone();

        let task = tokio::spawn(async move {
            store.acquire_lock().await?;
            let result = store.swap_locked(expected_epoch, &topology).await;
            store.release_lock().await;
            result
        });

        task.await
            .map_err(|e| StoreError::Io(format!("store task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::{ClusterNode, SlotRange, SlotSpace};
    use tempfile::TempDir;

    fn bootstrap() -> ClusterTopology {
        ClusterTopology::bootstrap("test", SlotSpace::new(16).unwrap(), "a")
    }

    fn split(prior: &ClusterTopology) -> ClusterTopology {
        prior.successor(vec![
            ClusterNode::active("a", SlotRange::new(0, 7)),
            ClusterNode::active("b", SlotRange::new(8, 15)),
        ])
    }

    #[tokio::test]
    async fn test_in_memory_compare_and_set() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.read().await.unwrap().is_none());

        let first = bootstrap();
        assert!(store.compare_and_set(0, &first).await.unwrap());
        assert_eq!(store.epoch(), 1);

        // Same base epoch again loses
        assert!(!store.compare_and_set(0, &first).await.unwrap());

        let second = split(&first);
        assert!(store.compare_and_set(1, &second).await.unwrap());
        assert_eq!(store.read().await.unwrap(), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_latency() {
        let store = InMemoryCoordinationStore::new();
        store.set_latency(Some(Duration::from_secs(3)));

        let start = tokio::time::Instant::now();
        store.read().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCoordinationStore::new(temp_dir.path()).await.unwrap();
        assert!(store.read().await.unwrap().is_none());

        let first = bootstrap();
        assert!(store.compare_and_set(0, &first).await.unwrap());
        assert_eq!(store.read().await.unwrap(), Some(first.clone()));

        assert!(!store.compare_and_set(0, &split(&first)).await.unwrap());
        assert!(store.compare_and_set(1, &split(&first)).await.unwrap());
        assert_eq!(store.read().await.unwrap().unwrap().epoch(), 2);

        // Lock is released after every swap
        assert!(!temp_dir.path().join("topology.lock").exists());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = FileCoordinationStore::new(temp_dir.path()).await.unwrap();
            store.compare_and_set(0, &bootstrap()).await.unwrap();
        }

        let store = FileCoordinationStore::new(temp_dir.path()).await.unwrap();
        assert_eq!(store.read().await.unwrap().unwrap().epoch(), 1);
    }

    #[tokio::test]
    async fn test_file_store_busy_when_locked() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCoordinationStore::new(temp_dir.path()).await.unwrap();

        std::fs::write(temp_dir.path().join("topology.lock"), b"").unwrap();
        let result = store.compare_and_set(0, &bootstrap()).await;
        assert_eq!(result, Err(StoreError::Busy));
        assert!(store.read().await.unwrap().is_none());
    }

    async fn wait_for_unlock(dir: &Path) {
        for _ in 0..200 {
            if !dir.join("topology.lock").exists() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("store lock was never released");
    }

    #[tokio::test]
    async fn test_file_store_abandoned_swap_releases_lock() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCoordinationStore::new(temp_dir.path()).await.unwrap();
        let first = bootstrap();

        // A zero timeout polls the swap once and then drops it
        let abandoned =
            tokio::time::timeout(Duration::ZERO, store.compare_and_set(0, &first)).await;
        assert!(abandoned.is_err());

        wait_for_unlock(temp_dir.path()).await;

        // The abandoned swap still landed, and the store accepts the next epoch
        assert_eq!(store.read().await.unwrap(), Some(first.clone()));
        assert!(store.compare_and_set(1, &split(&first)).await.unwrap());
        assert_eq!(store.read().await.unwrap().unwrap().epoch(), 2);
    }

    #[tokio::test]
    async fn test_file_store_corrupted() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCoordinationStore::new(temp_dir.path()).await.unwrap();

        std::fs::write(temp_dir.path().join("topology.bin"), b"\xff\xff\xff").unwrap();
        assert!(matches!(store.read().await, Err(StoreError::Corrupted(_))));
    }
}
