use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::modules::jobs::model::JobState;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source exceeds the limit of {max_bytes} bytes")]
    TooLarge { max_bytes: u64, observed: Option<u64> },
    #[error("fetch did not complete within {0:?}")]
    Timeout(Duration),
    #[error("unsupported content type '{0}'")]
    UnsupportedType(String),
    #[error("source unreachable: {0}")]
    Unreachable(String),
    #[error("scheme '{0}' is not allowed")]
    DisallowedScheme(String),
    #[error("invalid source reference: {0}")]
    InvalidReference(String),
    #[error("failed to store source: {0}")]
    Io(String),
    #[error("fetch cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::TooLarge { .. } => "too_large",
            SourceError::Timeout(_) => "timeout",
            SourceError::UnsupportedType(_) => "unsupported_type",
            SourceError::Unreachable(_) => "unreachable",
            SourceError::DisallowedScheme(_) => "disallowed_scheme",
            SourceError::InvalidReference(_) => "invalid_reference",
            SourceError::Io(_) => "io",
            SourceError::Cancelled => "cancelled",
        }
    }
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TranscodeError {
    #[error("invalid transcode options: {0}")]
    InvalidOptions(String),
    #[error("codec tool did not finish within {0:?}")]
    Timeout(Duration),
    #[error("codec tool failed with exit code {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none (killed by signal)".to_string()))]
    ToolFailed {
        exit_code: Option<i32>,
        diagnostic_tail: Vec<String>,
    },
    #[error("codec tool reported success but produced no output")]
    EmptyOutput,
    #[error("failed to launch codec tool: {0}")]
    Launch(String),
    #[error("i/o error during transcode: {0}")]
    Io(String),
    #[error("transcode cancelled")]
    Cancelled,
}

impl TranscodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            TranscodeError::InvalidOptions(_) => "invalid_options",
            TranscodeError::Timeout(_) => "timeout",
            TranscodeError::ToolFailed { .. } => "tool_failed",
            TranscodeError::EmptyOutput => "empty_output",
            TranscodeError::Launch(_) => "launch",
            TranscodeError::Io(_) => "io",
            TranscodeError::Cancelled => "cancelled",
        }
    }
}

impl From<std::io::Error> for TranscodeError {
    fn from(e: std::io::Error) -> Self {
        TranscodeError::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("workspace quota exhausted: {requested} bytes requested, {available} available")]
    Exhausted { requested: u64, available: u64 },
    #[error("workspace for job {0} is already active")]
    AlreadyActive(Uuid),
    #[error("workspace i/o error: {0}")]
    Io(String),
}

impl WorkspaceError {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkspaceError::Exhausted { .. } => "exhausted",
            WorkspaceError::AlreadyActive(_) => "already_active",
            WorkspaceError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for WorkspaceError {
    fn from(e: std::io::Error) -> Self {
        WorkspaceError::Io(e.to_string())
    }
}

/// Synchronous rejections returned to callers. Never stored on a job.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job {id} has no result yet (state: {state})")]
    NotReady { id: Uuid, state: JobState },
    #[error("too many jobs in flight (limit {limit}), try again later")]
    Overloaded { limit: usize },
    #[error("job {id} has no part {index}")]
    PartNotFound { id: Uuid, index: usize },
    #[error("job {id} was split into {parts} parts; download them one by one")]
    SplitResult { id: Uuid, parts: usize },
}
