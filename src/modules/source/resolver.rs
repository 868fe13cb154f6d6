use std::path::Path;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use super::model::{LocalInput, SourceLimits, SourceReference, UploadHandle};
use crate::common::error::SourceError;
use crate::common::filename::safe_filename;
use crate::infrastructure::storage::workspace::Workspace;

const OCTET_STREAM: &str = "application/octet-stream";

/// Turns a submitted reference into exactly one file in the job's input area.
#[derive(Debug, Clone)]
pub struct SourceResolver {
    limits: Arc<SourceLimits>,
}

impl SourceResolver {
    pub fn new(limits: SourceLimits) -> Self {
        Self {
            limits: Arc::new(limits),
        }
    }

    /// `on_bytes` receives the running total of bytes persisted.
    pub async fn resolve<F>(
        &self,
        reference: SourceReference,
        workspace: &Workspace,
        cancel: &CancellationToken,
        on_bytes: F,
    ) -> Result<LocalInput, SourceError>
    where
        F: FnMut(u64) + Send,
    {
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        match reference {
            SourceReference::Url(url) => self.resolve_url(&url, workspace, cancel, on_bytes).await,
            SourceReference::Upload(upload) => {
                self.resolve_upload(upload, workspace, on_bytes).await
            }
        }
    }

    /// Validation shared by uploads and remote fetches.
    fn check_size(&self, observed: u64) -> Result<(), SourceError> {
        if observed > self.limits.max_bytes {
            return Err(SourceError::TooLarge {
                max_bytes: self.limits.max_bytes,
                observed: Some(observed),
            });
        }
        Ok(())
    }

    fn check_type(&self, content_type: &str) -> Result<(), SourceError> {
        if !self.limits.is_mime_allowed(content_type) {
            return Err(SourceError::UnsupportedType(content_type.to_string()));
        }
        Ok(())
    }

    async fn resolve_upload<F>(
        &self,
        upload: UploadHandle,
        workspace: &Workspace,
        mut on_bytes: F,
    ) -> Result<LocalInput, SourceError>
    where
        F: FnMut(u64) + Send,
    {
        let received = upload.received_bytes();
        if upload.truncated() {
            // Only a lower bound is known; the excess was never written.
            return Err(SourceError::TooLarge {
                max_bytes: self.limits.max_bytes,
                observed: Some(received),
            });
        }
        self.check_size(received)?;

        let file_name = input_file_name(upload.file_name().unwrap_or(""));
        let content_type = resolve_content_type(upload.declared_type(), &file_name);
        self.check_type(&content_type)?;

        let dest = workspace.input_dir().join(&file_name);
        let staged = upload.into_staged();
        if let Err(e) = staged.persist(&dest) {
            // Staging may live on another filesystem; copy, then drop the staged file.
            tokio::fs::copy(&e.path, &dest).await?;
        }

        let bytes = tokio::fs::metadata(&dest).await?.len();
        on_bytes(bytes);

        info!(
            job_id = %workspace.job_id(),
            "📥 Upload claimed: {} ({} bytes, {})",
            file_name, bytes, content_type
        );
        Ok(LocalInput::new(dest, file_name, bytes, content_type))
    }

    async fn resolve_url<F>(
        &self,
        raw_url: &str,
        workspace: &Workspace,
        cancel: &CancellationToken,
        on_bytes: F,
    ) -> Result<LocalInput, SourceError>
    where
        F: FnMut(u64) + Send,
    {
        let url = Url::parse(raw_url.trim())
            .map_err(|e| SourceError::InvalidReference(e.to_string()))?;
        if !self.limits.is_scheme_allowed(url.scheme()) {
            return Err(SourceError::DisallowedScheme(url.scheme().to_string()));
        }

        let file_name = input_file_name(url.path());
        let dest = workspace.input_dir().join(&file_name);

        let fetched = tokio::time::timeout(
            self.limits.fetch_timeout,
            self.download(url, &dest, cancel, on_bytes),
        )
        .await
        .unwrap_or(Err(SourceError::Timeout(self.limits.fetch_timeout)));

        match fetched {
            Ok((bytes, content_type)) => {
                info!(
                    job_id = %workspace.job_id(),
                    "📥 Fetched {} ({} bytes, {})",
                    file_name, bytes, content_type
                );
                Ok(LocalInput::new(dest, file_name, bytes, content_type))
            }
            Err(e) => {
                remove_partial(&dest).await;
                Err(e)
            }
        }
    }

    fn build_client(
        &self,
        rejected_scheme: Arc<Mutex<Option<String>>>,
    ) -> Result<reqwest::Client, SourceError> {
        let limits = Arc::clone(&self.limits);
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= limits.redirect_limit {
                return attempt.error("redirect limit exceeded");
            }
            let scheme = attempt.url().scheme().to_string();
            if !limits.is_scheme_allowed(&scheme) {
                if let Ok(mut slot) = rejected_scheme.lock() {
                    *slot = Some(scheme);
                }
                return attempt.error("redirect to a disallowed scheme");
            }
            attempt.follow()
        });

        reqwest::Client::builder()
            .connect_timeout(self.limits.fetch_timeout)
            .redirect(policy)
            .build()
            .map_err(|e| SourceError::Unreachable(e.to_string()))
    }

    /// Streams the body to `dest`, returning bytes written and the resolved content type.
    async fn download<F>(
        &self,
        url: Url,
        dest: &Path,
        cancel: &CancellationToken,
        mut on_bytes: F,
    ) -> Result<(u64, String), SourceError>
    where
        F: FnMut(u64) + Send,
    {
        let rejected_scheme = Arc::new(Mutex::new(None));
        let client = self.build_client(Arc::clone(&rejected_scheme))?;

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            sent = client.get(url).send() => sent,
        };
        let response = sent.map_err(|e| self.map_reqwest_error(e, &rejected_scheme))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unreachable(format!("server responded {}", status)));
        }

        if let Some(declared) = response.content_length() {
            self.check_size(declared)?;
        }

        let header_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_type = resolve_content_type(header_type.as_deref(), response.url().path());
        self.check_type(&content_type)?;

        debug!("Streaming {} into {}", response.url(), dest.display());

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        let mut stream = std::pin::pin!(response.bytes_stream());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| self.map_reqwest_error(e, &rejected_scheme))?;

            let next_len = written + chunk.len() as u64;
            // Checked before the write so the file never holds more than the limit.
            self.check_size(next_len)?;

            file.write_all(&chunk).await?;
            written = next_len;
            on_bytes(written);
        }

        file.flush().await?;
        Ok((written, content_type))
    }

    fn map_reqwest_error(
        &self,
        err: reqwest::Error,
        rejected_scheme: &Mutex<Option<String>>,
    ) -> SourceError {
        if let Some(scheme) = rejected_scheme.lock().ok().and_then(|mut slot| slot.take()) {
            return SourceError::DisallowedScheme(scheme);
        }
        if err.is_timeout() {
            return SourceError::Timeout(self.limits.fetch_timeout);
        }
        SourceError::Unreachable(err.to_string())
    }
}

/// Header type with parameters stripped; falls back to the extension when the
/// header is missing or generic.
fn resolve_content_type(declared: Option<&str>, name: &str) -> String {
    let declared = declared
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty() && value != OCTET_STREAM);

    match declared {
        Some(value) => value,
        None => mime_guess::from_path(name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}

fn input_file_name(name: &str) -> String {
    let last = name
        .split(['/', '\\'])
        .rfind(|s| !s.is_empty())
        .unwrap_or("");
    let safe = safe_filename(last);
    if safe.is_empty() {
        "source".to_string()
    } else {
        safe
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove partial download {}: {}", path.display(), e);
        }
    }
}
