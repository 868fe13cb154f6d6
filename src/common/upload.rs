use std::path::Path;

use anyhow::{anyhow, Result};
use axum::{body::Bytes, extract::multipart::Field};
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::modules::source::model::UploadHandle;

/// Writes a multipart file part to a staging file, holding at most `max_bytes`.
///
/// Anything past the limit is drained and discarded; the handle records that
/// the body was oversized so the source resolver can reject it.
pub struct UploadStager {
    file: tokio::fs::File,
    staged: tempfile::TempPath,
    max_bytes: u64,
    written: u64,
    truncated: bool,
}

impl UploadStager {
    pub fn new(staging_dir: &Path, max_bytes: u64) -> Result<Self> {
        let named = tempfile::Builder::new()
            .prefix("upload-")
            .tempfile_in(staging_dir)
            .map_err(|e| anyhow!("Failed to create staging file: {}", e))?;
        let (file, staged) = named.into_parts();

        Ok(Self {
            file: tokio::fs::File::from_std(file),
            staged,
            max_bytes,
            written: 0,
            truncated: false,
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
        if self.truncated {
            return Ok(());
        }

        let next_len = self.written + chunk.len() as u64;
        if next_len > self.max_bytes {
            // Keep the staged bytes within the limit.
            let room = (self.max_bytes - self.written) as usize;
            self.file.write_all(&chunk[..room]).await?;
            self.written = self.max_bytes;
            self.truncated = true;
            return Ok(());
        }

        self.file.write_all(&chunk).await?;
        self.written = next_len;
        Ok(())
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub async fn finish(
        mut self,
        file_name: Option<String>,
        declared_type: Option<String>,
    ) -> Result<UploadHandle> {
        self.file.flush().await?;
        drop(self.file);

        debug!(
            "Staged upload {:?}: {} bytes (truncated: {})",
            file_name, self.written, self.truncated
        );

        Ok(UploadHandle::new(
            self.staged,
            file_name,
            declared_type,
            self.written,
            self.truncated,
        ))
    }
}

pub async fn stage_field(
    staging_dir: &Path,
    max_bytes: u64,
    mut field: Field<'_>,
) -> Result<UploadHandle> {
    let file_name = field.file_name().map(str::to_string);
    let declared_type = field.content_type().map(str::to_string);

    let mut stager = UploadStager::new(staging_dir, max_bytes)?;

    while let Some(chunk) = field.next().await {
        match chunk {
            Ok(chunk) => stager.write_chunk(chunk).await?,
            // The body limit cuts oversized requests off mid-part.
            Err(e) if stager.truncated() => {
                warn!("Upload stream ended after exceeding the limit: {}", e);
                break;
            }
            Err(e) => return Err(anyhow!("Upload stream interrupted: {}", e)),
        }
    }

    stager.finish(file_name, declared_type).await
}
