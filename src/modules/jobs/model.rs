use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::error::{SourceError, TranscodeError, WorkspaceError};
use crate::modules::source::model::SourceSummary;
use crate::workers::options::TranscodeOptions;
use crate::workers::progress::RUNNING_CEILING;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Fetching,
    Transcoding,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Fetching => "fetching",
            JobState::Transcoding => "transcoding",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Forward-only: queued -> fetching -> transcoding -> succeeded, with
    /// failed or cancelled reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Queued, Fetching) | (Fetching, Transcoding) | (Transcoding, Succeeded) => true,
            (Queued | Fetching | Transcoding, Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureComponent {
    Source,
    Transcode,
    Workspace,
    Pipeline,
}

/// Why a job failed, in a form safe to hand back to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JobFailure {
    pub component: FailureComponent,
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostic_tail: Vec<String>,
}

impl JobFailure {
    pub fn deadline(limit: Duration) -> Self {
        Self {
            component: FailureComponent::Pipeline,
            kind: "deadline_exceeded".into(),
            message: format!("job did not finish within {:?}", limit),
            diagnostic_tail: Vec::new(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            component: FailureComponent::Pipeline,
            kind: "internal".into(),
            message: message.into(),
            diagnostic_tail: Vec::new(),
        }
    }
}

impl From<&SourceError> for JobFailure {
    fn from(e: &SourceError) -> Self {
        Self {
            component: FailureComponent::Source,
            kind: e.kind().into(),
            message: e.to_string(),
            diagnostic_tail: Vec::new(),
        }
    }
}

impl From<&TranscodeError> for JobFailure {
    fn from(e: &TranscodeError) -> Self {
        let diagnostic_tail = match e {
            TranscodeError::ToolFailed { diagnostic_tail, .. } => diagnostic_tail.clone(),
            _ => Vec::new(),
        };
        Self {
            component: FailureComponent::Transcode,
            kind: e.kind().into(),
            message: e.to_string(),
            diagnostic_tail,
        }
    }
}

impl From<&WorkspaceError> for JobFailure {
    fn from(e: &WorkspaceError) -> Self {
        Self {
            component: FailureComponent::Workspace,
            kind: e.kind().into(),
            message: e.to_string(),
            diagnostic_tail: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ArtifactInfo {
    pub file_name: String,
    pub bytes: u64,
    pub content_type: String,
}

/// Snapshot of a job as observed by callers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Job {
    pub id: Uuid,
    pub source: SourceSummary,
    pub options: TranscodeOptions,
    pub state: JobState,
    /// 0..=100; only advances while transcoding and reaches 100 only on success.
    pub progress: u8,
    pub bytes_fetched: u64,
    pub error: Option<JobFailure>,
    pub input: Option<ArtifactInfo>,
    pub output: Option<ArtifactInfo>,
    /// Parts of a split output, in order. Each is downloaded on its own.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ArtifactInfo>,
    /// Set once the result has been streamed to completion and its workspace released.
    pub consumed: bool,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub completed_at: Option<OffsetDateTime>,
}

impl Job {
    pub fn new(id: Uuid, source: SourceSummary, options: TranscodeOptions) -> Self {
        Self {
            id,
            source,
            options,
            state: JobState::Queued,
            progress: 0,
            bytes_fetched: 0,
            error: None,
            input: None,
            output: None,
            parts: Vec::new(),
            consumed: false,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Applies `next` if the state machine allows it. Returns whether anything changed.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        let now = OffsetDateTime::now_utc();
        if self.state == JobState::Queued {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        if next == JobState::Succeeded {
            self.progress = 100;
        }
        self.state = next;
        true
    }

    pub fn fail(&mut self, failure: JobFailure) -> bool {
        if !self.transition(JobState::Failed) {
            return false;
        }
        self.error = Some(failure);
        true
    }

    pub fn succeed(&mut self, output: ArtifactInfo) -> bool {
        if !self.transition(JobState::Succeeded) {
            return false;
        }
        self.output = Some(output);
        true
    }

    pub fn succeed_in_parts(&mut self, parts: Vec<ArtifactInfo>) -> bool {
        if !self.transition(JobState::Succeeded) {
            return false;
        }
        self.parts = parts;
        true
    }

    /// Monotonic, transcoding-only, and capped below 100 until success.
    pub fn advance_progress(&mut self, pct: u8) -> bool {
        let pct = pct.min(RUNNING_CEILING);
        if self.state != JobState::Transcoding || pct <= self.progress {
            return false;
        }
        self.progress = pct;
        true
    }

    pub fn record_fetched(&mut self, bytes: u64) -> bool {
        if self.state != JobState::Fetching || bytes <= self.bytes_fetched {
            return false;
        }
        self.bytes_fetched = bytes;
        true
    }
}
