use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::options::TranscodePlan;
use super::transcoder::{LocalOutput, TranscodeExecutor};
use crate::common::error::{SourceError, TranscodeError};
use crate::infrastructure::storage::workspace::{Workspace, WorkspaceStore};
use crate::modules::jobs::model::{ArtifactInfo, JobFailure, JobState};
use crate::modules::jobs::repository::{JobEntry, StoredFile, StoredOutput};
use crate::modules::source::model::SourceReference;
use crate::modules::source::resolver::SourceResolver;

/// Everything a running job needs besides its own record.
pub struct PipelineContext {
    pub store: WorkspaceStore,
    pub resolver: SourceResolver,
    pub executor: TranscodeExecutor,
    pub workers: Arc<Semaphore>,
    pub job_deadline: Duration,
}

pub struct PipelineJob {
    pub entry: Arc<JobEntry>,
    pub reference: SourceReference,
    pub plan: TranscodePlan,
    pub workspace: Workspace,
    /// Counts the job against the pending limit until it reaches a terminal state.
    pub admission: OwnedSemaphorePermit,
}

enum StageError {
    Source(SourceError),
    Transcode(TranscodeError),
    Superseded,
    Deadline,
}

/// Drives one job from queued to a terminal state.
///
/// The workspace is released before a failed or cancelled state is published,
/// and kept for download when the job succeeds.
pub async fn run(ctx: Arc<PipelineContext>, job: PipelineJob) {
    let PipelineJob {
        entry,
        reference,
        plan,
        workspace,
        admission,
    } = job;
    let job_id = entry.id();
    let guard = ctx.store.guard(job_id);
    let cancel = entry.cancel_token().clone();

    let worker = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(&ctx.workers).acquire_owned() => Some(permit),
    };

    let result = match worker {
        None => Err(StageError::Superseded),
        Some(Err(e)) => {
            error!(job_id = %job_id, "Worker pool closed: {}", e);
            Err(StageError::Transcode(TranscodeError::Launch(e.to_string())))
        }
        Some(Ok(_worker)) => {
            let stage_cancel = cancel.child_token();
            let work = stages(&ctx, &entry, reference, &plan, &workspace, &stage_cancel);
            tokio::pin!(work);

            tokio::select! {
                result = &mut work => result,
                _ = tokio::time::sleep(ctx.job_deadline) => {
                    warn!(job_id = %job_id, "⏱️ Job exceeded its deadline of {:?}", ctx.job_deadline);
                    stage_cancel.cancel();
                    // Let the running stage tear down its subprocess and partial files.
                    let _ = (&mut work).await;
                    Err(StageError::Deadline)
                }
            }
        }
    };

    match result {
        Ok(output) if !cancel.is_cancelled() => {
            let artifacts: Vec<ArtifactInfo> = output
                .files
                .iter()
                .map(|file| ArtifactInfo {
                    file_name: file.file_name.clone(),
                    bytes: file.bytes,
                    content_type: output.content_type.clone(),
                })
                .collect();
            let segmented = output.segmented;
            entry.set_output(stored(output));
            drop(admission);

            let published = entry.update(|job| {
                if segmented {
                    return job.succeed_in_parts(artifacts);
                }
                match artifacts.into_iter().next() {
                    Some(single) => job.succeed(single),
                    None => false,
                }
            });
            if published {
                guard.disarm();
                info!(job_id = %job_id, "✅ Job succeeded");
            } else {
                // Usually cancelled out from under us; the guard drops the workspace.
                entry.take_output();
                entry.update(|job| job.fail(JobFailure::internal("job result could not be published")));
            }
        }
        outcome => {
            if let Err(e) = ctx.store.release(job_id).await {
                warn!(job_id = %job_id, "Failed to release workspace: {}", e);
            }
            guard.disarm();
            drop(admission);

            if cancel.is_cancelled() {
                entry.update(|job| job.transition(JobState::Cancelled));
                info!(job_id = %job_id, "🛑 Job cancelled");
                return;
            }

            let failure = match outcome {
                Err(StageError::Source(e)) => JobFailure::from(&e),
                Err(StageError::Transcode(e)) => JobFailure::from(&e),
                Err(StageError::Deadline) => JobFailure::deadline(ctx.job_deadline),
                Err(StageError::Superseded) | Ok(_) => {
                    JobFailure::internal("job was finalised elsewhere")
                }
            };
            warn!(job_id = %job_id, "❌ Job failed: {} ({})", failure.message, failure.kind);
            entry.update(|job| job.fail(failure));
        }
    }
}

fn stored(output: LocalOutput) -> StoredOutput {
    StoredOutput {
        files: output
            .files
            .into_iter()
            .map(|file| StoredFile {
                path: file.path,
                file_name: file.file_name,
                bytes: file.bytes,
                delivered: false,
            })
            .collect(),
        content_type: output.content_type,
        segmented: output.segmented,
    }
}

async fn stages(
    ctx: &PipelineContext,
    entry: &JobEntry,
    reference: SourceReference,
    plan: &TranscodePlan,
    workspace: &Workspace,
    cancel: &CancellationToken,
) -> Result<LocalOutput, StageError> {
    if !entry.update(|job| job.transition(JobState::Fetching)) {
        return Err(StageError::Superseded);
    }
    info!(job_id = %entry.id(), "⬇️ Fetching source");

    let input = ctx
        .resolver
        .resolve(reference, workspace, cancel, |bytes| {
            entry.update(|job| job.record_fetched(bytes));
        })
        .await
        .map_err(StageError::Source)?;

    let input_info = ArtifactInfo {
        file_name: input.file_name().to_string(),
        bytes: input.bytes(),
        content_type: input.content_type().to_string(),
    };
    let moved = entry.update(|job| {
        job.bytes_fetched = input_info.bytes;
        job.input = Some(input_info);
        job.transition(JobState::Transcoding)
    });
    if !moved {
        return Err(StageError::Superseded);
    }

    ctx.executor
        .run(&input, plan, workspace, cancel, |pct| {
            entry.update(|job| job.advance_progress(pct));
        })
        .await
        .map_err(StageError::Transcode)
}
