use std::env;
use std::str::FromStr;

use crate::config::settings::ConfigError;

pub enum EnvKey {
    ServerPort,
    WorkspaceRoot,
    MaxSourceBytes,
    AllowedSchemes,
    AllowedMimeTypes,
    FetchTimeoutSecs,
    FetchRedirectLimit,
    TranscodeTimeoutSecs,
    JobDeadlineSecs,
    CancelGraceSecs,
    MaxConcurrentTranscodes,
    MaxPendingJobs,
    DiskQuotaBytes,
    WorkspaceReservationBytes,
    ResultRetentionSecs,
    FfmpegPath,
    FfprobePath,
    DiagnosticTailLines,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::WorkspaceRoot => "WORKSPACE_ROOT",
            EnvKey::MaxSourceBytes => "MAX_SOURCE_BYTES",
            EnvKey::AllowedSchemes => "ALLOWED_SCHEMES",
            EnvKey::AllowedMimeTypes => "ALLOWED_MIME_TYPES",
            EnvKey::FetchTimeoutSecs => "FETCH_TIMEOUT_SECS",
            EnvKey::FetchRedirectLimit => "FETCH_REDIRECT_LIMIT",
            EnvKey::TranscodeTimeoutSecs => "TRANSCODE_TIMEOUT_SECS",
            EnvKey::JobDeadlineSecs => "JOB_DEADLINE_SECS",
            EnvKey::CancelGraceSecs => "CANCEL_GRACE_SECS",
            EnvKey::MaxConcurrentTranscodes => "MAX_CONCURRENT_TRANSCODES",
            EnvKey::MaxPendingJobs => "MAX_PENDING_JOBS",
            EnvKey::DiskQuotaBytes => "DISK_QUOTA_BYTES",
            EnvKey::WorkspaceReservationBytes => "WORKSPACE_RESERVATION_BYTES",
            EnvKey::ResultRetentionSecs => "RESULT_RETENTION_SECS",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::DiagnosticTailLines => "DIAGNOSTIC_TAIL_LINES",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

/// Parses the variable if set. A value that does not parse is an error, never the default.
pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> Result<T, ConfigError> {
    parse_or(key.as_str(), get(key).ok(), default)
}

fn parse_or<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: name,
            value,
        }),
        None => Ok(default),
    }
}

/// Comma separated list, trimmed and lowercased. Empty entries are dropped.
pub fn get_list(key: EnvKey, default: &str) -> Vec<String> {
    get_or(key, default)
        .split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
