use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::model::Job;

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: u64,
    /// Streamed to the end at least once.
    pub delivered: bool,
}

/// The produced files of a succeeded job, held until all are downloaded or they expire.
#[derive(Debug, Clone)]
pub struct StoredOutput {
    pub files: Vec<StoredFile>,
    pub content_type: String,
    pub segmented: bool,
}

/// One job's live record. All state changes go through `update`, which
/// publishes a new snapshot to every subscriber.
pub struct JobEntry {
    id: Uuid,
    state: watch::Sender<Job>,
    cancel: CancellationToken,
    output: Mutex<Option<StoredOutput>>,
}

impl JobEntry {
    pub fn new(job: Job) -> Self {
        let id = job.id;
        let (state, _) = watch::channel(job);
        Self {
            id,
            state,
            cancel: CancellationToken::new(),
            output: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn snapshot(&self) -> Job {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.state.subscribe()
    }

    /// `apply` returns whether it changed the job; subscribers are only woken if it did.
    pub fn update(&self, apply: impl FnOnce(&mut Job) -> bool) -> bool {
        self.state.send_if_modified(apply)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_output(&self, output: StoredOutput) {
        *self.output_slot() = Some(output);
    }

    pub fn output(&self) -> Option<StoredOutput> {
        self.output_slot().clone()
    }

    pub fn take_output(&self) -> Option<StoredOutput> {
        self.output_slot().take()
    }

    /// Records a completed download of file `index`. Once every file has been
    /// delivered the output is taken and returned, so the caller can free it.
    pub fn mark_delivered(&self, index: usize) -> Option<StoredOutput> {
        let mut slot = self.output_slot();
        let output = slot.as_mut()?;
        output.files.get_mut(index)?.delivered = true;
        if output.files.iter().all(|file| file.delivered) {
            slot.take()
        } else {
            None
        }
    }

    fn output_slot(&self) -> std::sync::MutexGuard<'_, Option<StoredOutput>> {
        self.output
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-memory job index. Jobs do not survive a restart.
#[derive(Clone, Default)]
pub struct JobRepository {
    jobs: Arc<RwLock<HashMap<Uuid, Arc<JobEntry>>>>,
}

impl JobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, entry: Arc<JobEntry>) {
        self.jobs.write().await.insert(entry.id(), entry);
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<JobEntry>> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<JobEntry>> {
        self.jobs.write().await.remove(&id)
    }

    pub async fn list(&self) -> Vec<Arc<JobEntry>> {
        self.jobs.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}
