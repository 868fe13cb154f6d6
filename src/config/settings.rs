use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::env::{self, EnvKey};

const MIB: u64 = 1024 * 1024;

/// Schemes a remote source may ever use. Configuration can narrow this set.
pub const PERMITTED_SCHEMES: [&str; 2] = ["http", "https"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("scheme '{0}' is not permitted for remote sources (only http and https)")]
    SchemeNotPermitted(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("JOB_DEADLINE_SECS must be at least FETCH_TIMEOUT_SECS")]
    DeadlineTooShort,
    #[error("WORKSPACE_RESERVATION_BYTES exceeds DISK_QUOTA_BYTES")]
    ReservationExceedsQuota,
    #[error("{key} has an invalid value '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub workspace_root: PathBuf,
    pub max_source_bytes: u64,
    pub allowed_schemes: Vec<String>,
    pub allowed_mime_types: Vec<String>,
    pub fetch_timeout_secs: u64,
    pub fetch_redirect_limit: usize,
    pub transcode_timeout_secs: u64,
    pub job_deadline_secs: u64,
    pub cancel_grace_secs: u64,
    pub max_concurrent_transcodes: usize,
    pub max_pending_jobs: usize,
    pub disk_quota_bytes: u64,
    pub workspace_reservation_bytes: u64,
    pub result_retention_secs: u64,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub diagnostic_tail_lines: usize,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let max_source_bytes = env::get_parsed(EnvKey::MaxSourceBytes, 512 * MIB)?;
        let default_root = std::env::temp_dir().join("transcode-workspaces");

        let config = Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 8501)?,
            workspace_root: env::get(EnvKey::WorkspaceRoot)
                .map(PathBuf::from)
                .unwrap_or(default_root),
            max_source_bytes,
            allowed_schemes: env::get_list(EnvKey::AllowedSchemes, "http,https"),
            allowed_mime_types: env::get_list(EnvKey::AllowedMimeTypes, "video/*,audio/*"),
            fetch_timeout_secs: env::get_parsed(EnvKey::FetchTimeoutSecs, 300)?,
            fetch_redirect_limit: env::get_parsed(EnvKey::FetchRedirectLimit, 5)?,
            transcode_timeout_secs: env::get_parsed(EnvKey::TranscodeTimeoutSecs, 1800)?,
            job_deadline_secs: env::get_parsed(EnvKey::JobDeadlineSecs, 2400)?,
            cancel_grace_secs: env::get_parsed(EnvKey::CancelGraceSecs, 10)?,
            max_concurrent_transcodes: env::get_parsed(EnvKey::MaxConcurrentTranscodes, 2)?,
            max_pending_jobs: env::get_parsed(EnvKey::MaxPendingJobs, 16)?,
            disk_quota_bytes: env::get_parsed(EnvKey::DiskQuotaBytes, 8 * 1024 * MIB)?,
            workspace_reservation_bytes: env::get_parsed(
                EnvKey::WorkspaceReservationBytes,
                max_source_bytes.saturating_mul(2),
            )?,
            result_retention_secs: env::get_parsed(EnvKey::ResultRetentionSecs, 3600)?,
            ffmpeg_path: PathBuf::from(env::get_or(EnvKey::FfmpegPath, "ffmpeg")),
            ffprobe_path: PathBuf::from(env::get_or(EnvKey::FfprobePath, "ffprobe")),
            diagnostic_tail_lines: env::get_parsed(EnvKey::DiagnosticTailLines, 20)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(scheme) = self
            .allowed_schemes
            .iter()
            .find(|s| !PERMITTED_SCHEMES.contains(&s.as_str()))
        {
            return Err(ConfigError::SchemeNotPermitted(scheme.clone()));
        }
        if self.max_source_bytes == 0 {
            return Err(ConfigError::Zero("MAX_SOURCE_BYTES"));
        }
        if self.max_concurrent_transcodes == 0 {
            return Err(ConfigError::Zero("MAX_CONCURRENT_TRANSCODES"));
        }
        if self.max_pending_jobs == 0 {
            return Err(ConfigError::Zero("MAX_PENDING_JOBS"));
        }
        if self.job_deadline_secs < self.fetch_timeout_secs {
            return Err(ConfigError::DeadlineTooShort);
        }
        if self.workspace_reservation_bytes > self.disk_quota_bytes {
            return Err(ConfigError::ReservationExceedsQuota);
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn result_retention(&self) -> Duration {
        Duration::from_secs(self.result_retention_secs)
    }

    /// Staged uploads may hold one byte past the limit so oversize bodies are detectable.
    pub fn upload_body_limit(&self) -> usize {
        usize::try_from(self.max_source_bytes)
            .unwrap_or(usize::MAX)
            .saturating_add(64 * 1024)
    }
}
