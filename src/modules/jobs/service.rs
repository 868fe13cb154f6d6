use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, future, stream};
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::model::{Job, JobFailure, JobState};
use super::repository::{JobEntry, JobRepository};
use crate::common::error::{JobError, WorkspaceError};
use crate::config::settings::AppConfig;
use crate::infrastructure::storage::workspace::WorkspaceStore;
use crate::modules::source::model::{SourceLimits, SourceReference};
use crate::modules::source::resolver::SourceResolver;
use crate::workers::options::{TranscodeOptions, TranscodePlan};
use crate::workers::pipeline::{self, PipelineContext, PipelineJob};
use crate::workers::transcoder::{ExecutorSettings, TranscodeExecutor};

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_pending_jobs: usize,
    pub max_concurrent_transcodes: usize,
    pub job_deadline: Duration,
    pub cancel_grace: Duration,
    pub result_retention: Duration,
}

impl ManagerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_pending_jobs: config.max_pending_jobs,
            max_concurrent_transcodes: config.max_concurrent_transcodes,
            job_deadline: config.job_deadline(),
            cancel_grace: config.cancel_grace(),
            result_retention: config.result_retention(),
        }
    }
}

/// Accepts jobs, runs them through fetch and transcode, and serves their results.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    repo: JobRepository,
    pipeline: Arc<PipelineContext>,
    admission: Arc<Semaphore>,
    settings: ManagerSettings,
}

/// A held place among the pending jobs.
pub struct AdmissionTicket(OwnedSemaphorePermit);

/// A succeeded job's artifact, opened for download.
pub struct JobResult {
    pub file_name: String,
    pub content_type: String,
    pub bytes: u64,
    file: tokio::fs::File,
    manager: JobManager,
    id: Uuid,
    index: usize,
}

impl JobResult {
    /// Body stream. Reading it to the end marks the file delivered; once every
    /// file of the job is delivered the workspace is released.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let JobResult {
            file,
            manager,
            id,
            index,
            ..
        } = self;
        let failed = Arc::new(AtomicBool::new(false));

        let body = ReaderStream::new(file).inspect({
            let failed = Arc::clone(&failed);
            move |chunk| {
                if chunk.is_err() {
                    failed.store(true, Ordering::Relaxed);
                }
            }
        });
        let release = stream::once(async move {
            if !failed.load(Ordering::Relaxed) {
                manager.release_result(id, index).await;
            }
            None::<io::Result<Bytes>>
        })
        .filter_map(future::ready);

        body.chain(release)
    }
}

impl JobManager {
    pub fn new(
        store: WorkspaceStore,
        resolver: SourceResolver,
        executor: TranscodeExecutor,
        settings: ManagerSettings,
    ) -> Self {
        let pipeline = PipelineContext {
            store,
            resolver,
            executor,
            workers: Arc::new(Semaphore::new(settings.max_concurrent_transcodes)),
            job_deadline: settings.job_deadline,
        };
        Self {
            inner: Arc::new(ManagerInner {
                repo: JobRepository::new(),
                pipeline: Arc::new(pipeline),
                admission: Arc::new(Semaphore::new(settings.max_pending_jobs)),
                settings,
            }),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, WorkspaceError> {
        let store = WorkspaceStore::new(
            &config.workspace_root,
            config.disk_quota_bytes,
            config.workspace_reservation_bytes,
        )
        .await?;
        Ok(Self::new(
            store,
            SourceResolver::new(SourceLimits::from_config(config)),
            TranscodeExecutor::new(ExecutorSettings::from_config(config)),
            ManagerSettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &WorkspaceStore {
        &self.inner.pipeline.store
    }

    /// Jobs admitted but not yet terminal.
    pub fn pending_jobs(&self) -> usize {
        self.inner.settings.max_pending_jobs - self.inner.admission.available_permits()
    }

    /// Reserves a place among the pending jobs, or fails with `Overloaded`.
    ///
    /// Dropping the ticket unused gives the place back.
    pub fn admit(&self) -> Result<AdmissionTicket, JobError> {
        Arc::clone(&self.inner.admission)
            .try_acquire_owned()
            .map(AdmissionTicket)
            .map_err(|_| JobError::Overloaded {
                limit: self.inner.settings.max_pending_jobs,
            })
    }

    /// Registers a job and starts it in the background.
    ///
    /// Returns as soon as the job is recorded. Invalid options or an exhausted
    /// workspace quota still produce a job id; the job is simply already failed.
    pub async fn submit(
        &self,
        reference: SourceReference,
        options: TranscodeOptions,
    ) -> Result<Uuid, JobError> {
        let ticket = self.admit()?;
        Ok(self.submit_admitted(ticket, reference, options).await)
    }

    /// `submit` for callers that took their admission ticket up front.
    pub async fn submit_admitted(
        &self,
        ticket: AdmissionTicket,
        reference: SourceReference,
        options: TranscodeOptions,
    ) -> Uuid {
        let admission = ticket.0;
        let id = Uuid::new_v4();
        let entry = Arc::new(JobEntry::new(Job::new(id, reference.summary(), options.clone())));
        self.inner.repo.insert(Arc::clone(&entry)).await;

        let plan = match TranscodePlan::from_options(&options) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(job_id = %id, "❌ Rejected options: {}", e);
                entry.update(|job| job.fail(JobFailure::from(&e)));
                return id;
            }
        };

        let workspace = match self.inner.pipeline.store.acquire(id).await {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!(job_id = %id, "❌ No workspace: {}", e);
                entry.update(|job| job.fail(JobFailure::from(&e)));
                return id;
            }
        };

        info!(job_id = %id, "📦 Job queued as {}", plan.format);

        let task = tokio::spawn(pipeline::run(
            Arc::clone(&self.inner.pipeline),
            PipelineJob {
                entry: Arc::clone(&entry),
                reference,
                plan,
                workspace,
                admission,
            },
        ));

        // A panicking pipeline must still leave the job terminal.
        tokio::spawn(async move {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(job_id = %id, "Job pipeline panicked");
                    entry.update(|job| job.fail(JobFailure::internal("job pipeline panicked")));
                }
            }
        });

        id
    }

    async fn entry(&self, id: Uuid) -> Result<Arc<JobEntry>, JobError> {
        self.inner.repo.get(id).await.ok_or(JobError::NotFound(id))
    }

    pub async fn status(&self, id: Uuid) -> Result<Job, JobError> {
        Ok(self.entry(id).await?.snapshot())
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .repo
            .list()
            .await
            .iter()
            .map(|entry| entry.snapshot())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<Job>, JobError> {
        Ok(self.entry(id).await?.subscribe())
    }

    /// The current snapshot followed by every change, ending after a terminal state.
    ///
    /// Intermediate progress values may be coalesced; ordering is preserved.
    pub async fn watch(
        &self,
        id: Uuid,
    ) -> Result<impl Stream<Item = Job> + Send + 'static + use<>, JobError> {
        let rx = self.subscribe(id).await?;
        Ok(stream::unfold(Some((rx, true)), |state| async move {
            let (mut rx, first) = state?;
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let job = rx.borrow_and_update().clone();
            let next = if job.state.is_terminal() {
                None
            } else {
                Some((rx, false))
            };
            Some((job, next))
        }))
    }

    /// Idempotent. Waits up to the grace period for the job to wind down on its own,
    /// then forces the workspace out and marks the job cancelled.
    pub async fn cancel(&self, id: Uuid) -> Result<Job, JobError> {
        let entry = self.entry(id).await?;
        if entry.snapshot().state.is_terminal() {
            return Ok(entry.snapshot());
        }

        info!(job_id = %id, "🛑 Cancellation requested");
        entry.cancel_token().cancel();

        let mut rx = entry.subscribe();
        let settled = tokio::time::timeout(self.inner.settings.cancel_grace, async {
            rx.wait_for(|job| job.state.is_terminal()).await.map(|_| ())
        })
        .await;

        if !matches!(settled, Ok(Ok(()))) {
            warn!(job_id = %id, "Job did not stop within {:?}, forcing cleanup", self.inner.settings.cancel_grace);
            if let Err(e) = self.inner.pipeline.store.release(id).await {
                warn!(job_id = %id, "Failed to release workspace: {}", e);
            }
            entry.take_output();
            entry.update(|job| job.transition(JobState::Cancelled));
        }

        Ok(entry.snapshot())
    }

    /// The single artifact of a succeeded job. Split results are fetched with `fetch_part`.
    pub async fn fetch_result(&self, id: Uuid) -> Result<JobResult, JobError> {
        self.open_output(id, None).await
    }

    /// Part `number` (1-based) of a split result.
    pub async fn fetch_part(&self, id: Uuid, number: usize) -> Result<JobResult, JobError> {
        self.open_output(id, Some(number)).await
    }

    async fn open_output(&self, id: Uuid, part: Option<usize>) -> Result<JobResult, JobError> {
        let entry = self.entry(id).await?;
        let job = entry.snapshot();
        if job.state != JobState::Succeeded {
            return Err(JobError::NotReady {
                id,
                state: job.state,
            });
        }

        let output = entry.output().ok_or(JobError::NotFound(id))?;
        let index = match part {
            None if output.segmented => {
                return Err(JobError::SplitResult {
                    id,
                    parts: output.files.len(),
                });
            }
            None => 0,
            Some(number) if output.segmented && (1..=output.files.len()).contains(&number) => {
                number - 1
            }
            Some(number) => return Err(JobError::PartNotFound { id, index: number }),
        };
        let stored = output
            .files
            .into_iter()
            .nth(index)
            .ok_or(JobError::NotFound(id))?;

        let file = tokio::fs::File::open(&stored.path).await.map_err(|e| {
            warn!(job_id = %id, "Result file unavailable: {}", e);
            JobError::NotFound(id)
        })?;

        Ok(JobResult {
            file_name: stored.file_name,
            content_type: output.content_type,
            bytes: stored.bytes,
            file,
            manager: self.clone(),
            id,
            index,
        })
    }

    async fn release_result(&self, id: Uuid, index: usize) {
        let Ok(entry) = self.entry(id).await else {
            return;
        };
        if entry.mark_delivered(index).is_none() {
            return;
        }
        if let Err(e) = self.inner.pipeline.store.release(id).await {
            warn!(job_id = %id, "Failed to release workspace after download: {}", e);
        }
        entry.update(|job| {
            let first = !job.consumed;
            job.consumed = true;
            first
        });
        debug!(job_id = %id, "Result consumed, workspace released");
    }

    /// Forgets terminal jobs older than the retention window and frees their workspaces.
    pub async fn sweep_expired(&self) -> usize {
        let retention = self.inner.settings.result_retention;
        let now = OffsetDateTime::now_utc();
        let mut removed = 0;

        for entry in self.inner.repo.list().await {
            let job = entry.snapshot();
            let expired = job.state.is_terminal()
                && job
                    .completed_at
                    .is_some_and(|done| now - done >= retention);
            if !expired {
                continue;
            }

            entry.take_output();
            if let Err(e) = self.inner.pipeline.store.release(job.id).await {
                warn!(job_id = %job.id, "Failed to release expired workspace: {}", e);
                continue;
            }
            self.inner.repo.remove(job.id).await;
            removed += 1;
        }

        if removed > 0 {
            info!("🧹 Swept {} expired jobs", removed);
        }
        removed
    }

    pub fn spawn_retention_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep_expired().await;
            }
        })
    }

    /// Cancels every running job and waits for their workspaces to be released.
    pub async fn shutdown(&self) {
        let running: Vec<Uuid> = self
            .inner
            .repo
            .list()
            .await
            .iter()
            .filter(|entry| !entry.snapshot().state.is_terminal())
            .map(|entry| entry.id())
            .collect();

        if running.is_empty() {
            return;
        }
        info!("Cancelling {} running jobs", running.len());
        future::join_all(running.into_iter().map(|id| self.cancel(id))).await;
    }
}
