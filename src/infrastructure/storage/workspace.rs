use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::error::WorkspaceError;

const INPUT_DIR: &str = "input";
const OUTPUT_DIR: &str = "output";
const STAGING_DIR: &str = ".staging";

/// Per-job directory tree: `<root>/<job-id>/{input,output}`.
#[derive(Debug, Clone)]
pub struct Workspace {
    job_id: Uuid,
    root: PathBuf,
}

impl Workspace {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join(INPUT_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }
}

#[derive(Clone)]
pub struct WorkspaceStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    root: PathBuf,
    quota_bytes: u64,
    reservation_bytes: u64,
    // job id -> reserved bytes
    active: Mutex<HashMap<Uuid, u64>>,
}

impl WorkspaceStore {
    pub async fn new(
        root: impl Into<PathBuf>,
        quota_bytes: u64,
        reservation_bytes: u64,
    ) -> Result<Self, WorkspaceError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(STAGING_DIR)).await?;

        info!("📁 Workspace root at {}", root.display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                root,
                quota_bytes,
                reservation_bytes,
                active: Mutex::new(HashMap::new()),
            }),
        })
    }

    fn active(&self) -> MutexGuard<'_, HashMap<Uuid, u64>> {
        // A panic while holding the lock cannot leave the map inconsistent.
        self.inner
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Directory where multipart uploads are staged before a job claims them.
    pub fn staging_dir(&self) -> PathBuf {
        self.inner.root.join(STAGING_DIR)
    }

    fn job_root(&self, job_id: Uuid) -> PathBuf {
        self.inner.root.join(job_id.to_string())
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.active().values().sum()
    }

    pub fn active_count(&self) -> usize {
        self.active().len()
    }

    /// Removes everything a previous process left behind under the root.
    ///
    /// Nothing survives a restart, so every job directory found here is stale.
    pub async fn recover(&self) -> Result<usize, WorkspaceError> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.inner.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove stale entry {}: {}", path.display(), e),
            }
        }

        tokio::fs::create_dir_all(self.staging_dir()).await?;

        if removed > 0 {
            info!("🧹 Removed {} stale workspace entries", removed);
        }
        Ok(removed)
    }

    pub async fn acquire(&self, job_id: Uuid) -> Result<Workspace, WorkspaceError> {
        let requested = self.inner.reservation_bytes;
        {
            let mut active = self.active();
            if active.contains_key(&job_id) {
                return Err(WorkspaceError::AlreadyActive(job_id));
            }
            let used: u64 = active.values().sum();
            let available = self.inner.quota_bytes.saturating_sub(used);
            if requested > available {
                return Err(WorkspaceError::Exhausted {
                    requested,
                    available,
                });
            }
            active.insert(job_id, requested);
        }

        let workspace = Workspace {
            job_id,
            root: self.job_root(job_id),
        };

        let created = async {
            tokio::fs::create_dir_all(workspace.input_dir()).await?;
            tokio::fs::create_dir_all(workspace.output_dir()).await
        }
        .await;

        if let Err(e) = created {
            let _ = tokio::fs::remove_dir_all(workspace.root()).await;
            self.active().remove(&job_id);
            return Err(e.into());
        }

        debug!(job_id = %job_id, "Workspace acquired at {}", workspace.root().display());
        Ok(workspace)
    }

    /// Removes the job's tree and frees its reservation. Safe to call repeatedly.
    pub async fn release(&self, job_id: Uuid) -> Result<(), WorkspaceError> {
        let root = self.job_root(job_id);
        let result = match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::from(e)),
        };

        if self.active().remove(&job_id).is_some() {
            debug!(job_id = %job_id, "Workspace released");
        }
        result
    }

    /// Blocking variant for drop paths where no runtime may be available.
    pub fn release_blocking(&self, job_id: Uuid) {
        let root = self.job_root(job_id);
        if let Err(e) = std::fs::remove_dir_all(&root) {
            if e.kind() != ErrorKind::NotFound {
                warn!(job_id = %job_id, "Failed to remove workspace {}: {}", root.display(), e);
            }
        }
        self.active().remove(&job_id);
    }

    /// Releases the workspace when dropped unless disarmed.
    pub fn guard(&self, job_id: Uuid) -> WorkspaceGuard {
        WorkspaceGuard {
            store: self.clone(),
            job_id,
            armed: true,
        }
    }
}

pub struct WorkspaceGuard {
    store: WorkspaceStore,
    job_id: Uuid,
    armed: bool,
}

impl WorkspaceGuard {
    /// Keeps the workspace alive past the guard, e.g. for a result awaiting download.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.armed {
            self.store.release_blocking(self.job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store(quota: u64, reservation: u64) -> (tempfile::TempDir, WorkspaceStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::new(dir.path().join("ws"), quota, reservation)
            .await
            .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn acquire_creates_isolated_tree() {
        let (_dir, store) = store(100, 10).await;
        let a = store.acquire(Uuid::new_v4()).await.unwrap();
        let b = store.acquire(Uuid::new_v4()).await.unwrap();

        assert!(a.input_dir().is_dir());
        assert!(a.output_dir().is_dir());
        assert_ne!(a.root(), b.root());
        assert!(a.root().starts_with(store.root()));
        assert_eq!(store.reserved_bytes(), 20);
    }

    #[tokio::test]
    async fn acquire_fails_when_quota_exhausted() {
        let (_dir, store) = store(25, 10).await;
        store.acquire(Uuid::new_v4()).await.unwrap();
        store.acquire(Uuid::new_v4()).await.unwrap();

        let err = store.acquire(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(
            err,
            WorkspaceError::Exhausted {
                requested: 10,
                available: 5
            }
        );
        assert_eq!(store.active_count(), 2);
    }

    #[tokio::test]
    async fn acquire_twice_is_rejected() {
        let (_dir, store) = store(100, 10).await;
        let id = Uuid::new_v4();
        store.acquire(id).await.unwrap();
        assert_eq!(
            store.acquire(id).await.unwrap_err(),
            WorkspaceError::AlreadyActive(id)
        );
    }

    #[tokio::test]
    async fn release_removes_files_and_frees_quota() {
        let (_dir, store) = store(10, 10).await;
        let id = Uuid::new_v4();
        let ws = store.acquire(id).await.unwrap();
        tokio::fs::write(ws.output_dir().join("out.mp3"), b"data")
            .await
            .unwrap();

        store.release(id).await.unwrap();
        assert!(!ws.root().exists());
        assert_eq!(store.reserved_bytes(), 0);

        // idempotent
        store.release(id).await.unwrap();
        store.acquire(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn guard_releases_on_drop_unless_disarmed() {
        let (_dir, store) = store(100, 10).await;
        let dropped = store.acquire(Uuid::new_v4()).await.unwrap();
        let kept = store.acquire(Uuid::new_v4()).await.unwrap();

        drop(store.guard(dropped.job_id()));
        store.guard(kept.job_id()).disarm();

        assert!(!dropped.root().exists());
        assert!(kept.root().exists());
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn recover_wipes_leftovers() {
        let (dir, store) = store(100, 10).await;
        let stale = dir.path().join("ws").join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(stale.join("input")).unwrap();
        std::fs::write(stale.join("input").join("clip.mp4"), b"x").unwrap();

        let removed = store.recover().await.unwrap();
        assert!(removed >= 1);
        assert!(!stale.exists());
        assert!(store.staging_dir().is_dir());
    }
}
