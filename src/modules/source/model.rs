use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use utoipa::ToSchema;

use crate::config::settings::AppConfig;

/// Upload body already received by the HTTP layer, staged outside any workspace.
///
/// The staged file is deleted when the handle is dropped without being claimed.
#[derive(Debug)]
pub struct UploadHandle {
    staged: TempPath,
    file_name: Option<String>,
    declared_type: Option<String>,
    received_bytes: u64,
    truncated: bool,
}

impl UploadHandle {
    pub fn new(
        staged: TempPath,
        file_name: Option<String>,
        declared_type: Option<String>,
        received_bytes: u64,
        truncated: bool,
    ) -> Self {
        Self {
            staged,
            file_name,
            declared_type,
            received_bytes,
            truncated,
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn declared_type(&self) -> Option<&str> {
        self.declared_type.as_deref()
    }

    /// Bytes written to the staging file. Never more than the configured limit.
    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    /// True when the client sent more than the staging limit allowed.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub(crate) fn into_staged(self) -> TempPath {
        self.staged
    }
}

#[derive(Debug)]
pub enum SourceReference {
    Url(String),
    Upload(UploadHandle),
}

impl SourceReference {
    pub fn summary(&self) -> SourceSummary {
        match self {
            SourceReference::Url(url) => SourceSummary::Url { url: url.clone() },
            SourceReference::Upload(upload) => SourceSummary::Upload {
                file_name: upload.file_name().map(str::to_string),
            },
        }
    }
}

/// What the caller submitted, as shown in job snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSummary {
    Url { url: String },
    Upload { file_name: Option<String> },
}

#[derive(Debug, Clone)]
pub struct SourceLimits {
    pub max_bytes: u64,
    pub allowed_schemes: Vec<String>,
    pub allowed_mime_types: Vec<String>,
    pub fetch_timeout: Duration,
    pub redirect_limit: usize,
}

impl SourceLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_bytes: config.max_source_bytes,
            allowed_schemes: config.allowed_schemes.clone(),
            allowed_mime_types: config.allowed_mime_types.clone(),
            fetch_timeout: config.fetch_timeout(),
            redirect_limit: config.fetch_redirect_limit,
        }
    }

    pub fn is_scheme_allowed(&self, scheme: &str) -> bool {
        self.allowed_schemes
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(scheme))
    }

    /// Matches exact types and `type/*` wildcards.
    pub fn is_mime_allowed(&self, content_type: &str) -> bool {
        let Ok(mime) = content_type.parse::<mime::Mime>() else {
            return false;
        };
        self.allowed_mime_types.iter().any(|allowed| {
            match allowed.split_once('/') {
                Some((top, "*")) => mime.type_().as_str().eq_ignore_ascii_case(top),
                _ => mime.essence_str().eq_ignore_ascii_case(allowed),
            }
        })
    }
}

/// The one file a resolved source occupies inside a job's input area.
#[derive(Debug, Clone)]
pub struct LocalInput {
    path: PathBuf,
    file_name: String,
    bytes: u64,
    content_type: String,
}

impl LocalInput {
    pub(crate) fn new(path: PathBuf, file_name: String, bytes: u64, content_type: String) -> Self {
        Self {
            path,
            file_name,
            bytes,
            content_type,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }
}
