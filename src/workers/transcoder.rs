use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::options::{SEGMENT_PREFIX, TranscodePlan};
use super::probe::probe_duration;
use super::process::ProcessHandle;
use super::progress::{DiagnosticTail, ProgressTracker};
use crate::common::error::TranscodeError;
use crate::common::filename::{output_file_name, source_stem};
use crate::config::settings::AppConfig;
use crate::infrastructure::storage::workspace::Workspace;
use crate::modules::source::model::LocalInput;

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub timeout: Duration,
    pub diagnostic_tail_lines: usize,
}

impl ExecutorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            timeout: config.transcode_timeout(),
            diagnostic_tail_lines: config.diagnostic_tail_lines,
        }
    }
}

/// One produced file inside the job's output area.
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: PathBuf,
    /// Name offered to the caller on download.
    pub file_name: String,
    pub bytes: u64,
}

/// What a run produced: a single file, or the numbered parts of a split run.
#[derive(Debug, Clone)]
pub struct LocalOutput {
    pub files: Vec<OutputFile>,
    pub content_type: String,
    pub segmented: bool,
}

/// Runs one ffmpeg invocation per job and reports progress as it goes.
#[derive(Debug, Clone)]
pub struct TranscodeExecutor {
    settings: Arc<ExecutorSettings>,
}

impl TranscodeExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// `on_progress` only ever sees increasing values, ending with 100 on success.
    pub async fn run<F>(
        &self,
        input: &LocalInput,
        plan: &TranscodePlan,
        workspace: &Workspace,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<LocalOutput, TranscodeError>
    where
        F: FnMut(u8) + Send,
    {
        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        let deadline = tokio::time::sleep(self.settings.timeout);
        tokio::pin!(deadline);

        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            _ = &mut deadline => return Err(TranscodeError::Timeout(self.settings.timeout)),
            probed = probe_duration(&self.settings.ffprobe_path, input.path()) => probed,
        };
        let expected = plan.expected_duration(probed);
        let mut tracker = ProgressTracker::new(expected);
        let mut tail = DiagnosticTail::new(self.settings.diagnostic_tail_lines);

        let output_dir = workspace.output_dir();
        let target = plan.output_target(&output_dir);

        let mut command = Command::new(&self.settings.ffmpeg_path);
        command
            .args(plan.args(input.path(), &target))
            .current_dir(&output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if cancel.is_cancelled() {
            return Err(TranscodeError::Cancelled);
        }

        info!(
            job_id = %workspace.job_id(),
            "🎥 Transcoding {} -> {} (expected {:?}s)",
            input.file_name(),
            plan.format,
            expected
        );

        let mut process = ProcessHandle::spawn(&mut command)
            .map_err(|e| TranscodeError::Launch(e.to_string()))?;

        let stdout = process
            .take_stdout()
            .ok_or_else(|| TranscodeError::Launch("stdout not captured".into()))?;
        let stderr = process
            .take_stderr()
            .ok_or_else(|| TranscodeError::Launch("stderr not captured".into()))?;
        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        // Partial lines survive a lost select race; read_until appends.
        let mut stdout_line = Vec::new();
        let mut stderr_line = Vec::new();
        let mut stdout_open = true;
        let mut stderr_open = true;

        let status = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    process.terminate().await;
                    clear_outputs(&output_dir).await;
                    return Err(TranscodeError::Cancelled);
                }
                _ = &mut deadline => {
                    process.terminate().await;
                    clear_outputs(&output_dir).await;
                    warn!(job_id = %workspace.job_id(), "⏱️ Transcode exceeded {:?}", self.settings.timeout);
                    return Err(TranscodeError::Timeout(self.settings.timeout));
                }
                read = stdout.read_until(b'\n', &mut stdout_line), if stdout_open => {
                    stdout_open = matches!(read, Ok(n) if n > 0);
                    if let Some(line) = take_line(&mut stdout_line, !stdout_open) {
                        if let Some(pct) = tracker.observe_progress_line(&line) {
                            on_progress(pct);
                        }
                    }
                }
                read = stderr.read_until(b'\n', &mut stderr_line), if stderr_open => {
                    stderr_open = matches!(read, Ok(n) if n > 0);
                    if let Some(line) = take_line(&mut stderr_line, !stderr_open) {
                        if let Some(pct) = tracker.observe_stats_line(&line) {
                            on_progress(pct);
                        }
                        tail.push(&line);
                    }
                }
                status = process.wait(), if !stdout_open && !stderr_open => break status?,
            }
        };

        if !status.success() {
            clear_outputs(&output_dir).await;
            let diagnostic_tail = tail.into_vec();
            warn!(
                job_id = %workspace.job_id(),
                "❌ ffmpeg exited with {:?}: {}",
                status.code(),
                diagnostic_tail.last().map(String::as_str).unwrap_or("<no output>")
            );
            return Err(TranscodeError::ToolFailed {
                exit_code: status.code(),
                diagnostic_tail,
            });
        }

        let stem = source_stem(input.file_name());
        let files = if plan.is_segmented() {
            collect_parts(&output_dir, &stem, plan).await
        } else {
            collect_single(&target, &stem, plan).await
        };
        let Some(files) = files else {
            clear_outputs(&output_dir).await;
            return Err(TranscodeError::EmptyOutput);
        };

        on_progress(100);

        info!(
            job_id = %workspace.job_id(),
            "✅ Transcode finished: {} file(s), {} bytes",
            files.len(),
            files.iter().map(|f| f.bytes).sum::<u64>()
        );

        Ok(LocalOutput {
            files,
            content_type: plan.format.mime_type().to_string(),
            segmented: plan.is_segmented(),
        })
    }
}

async fn collect_single(path: &Path, stem: &str, plan: &TranscodePlan) -> Option<Vec<OutputFile>> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() || meta.len() == 0 {
        return None;
    }
    Some(vec![OutputFile {
        path: path.to_path_buf(),
        file_name: output_file_name(plan.filename_prefix.as_deref(), stem, plan.format.extension()),
        bytes: meta.len(),
    }])
}

/// Every `part_NNN.<ext>` in order. None unless there is at least one part and none is empty.
async fn collect_parts(dir: &Path, stem: &str, plan: &TranscodePlan) -> Option<Vec<OutputFile>> {
    let ext = plan.format.extension();
    let suffix = format!(".{}", ext);
    let mut found = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(SEGMENT_PREFIX) || !name.ends_with(&suffix) {
            continue;
        }
        let meta = entry.metadata().await.ok()?;
        if !meta.is_file() || meta.len() == 0 {
            return None;
        }
        found.push((name, entry.path(), meta.len()));
    }
    if found.is_empty() {
        return None;
    }
    found.sort();

    let files = found
        .into_iter()
        .enumerate()
        .map(|(index, (_, path, bytes))| OutputFile {
            path,
            file_name: output_file_name(
                plan.filename_prefix.as_deref(),
                &format!("{}_part_{:03}", stem, index + 1),
                ext,
            ),
            bytes,
        })
        .collect();
    Some(files)
}

/// Takes a complete line out of `buf`, or whatever is left once the pipe closed.
/// Bytes that are not UTF-8 are replaced rather than ending the read.
fn take_line(buf: &mut Vec<u8>, closed: bool) -> Option<String> {
    if buf.is_empty() || (!closed && buf.last() != Some(&b'\n')) {
        return None;
    }
    let line = String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    buf.clear();
    Some(line)
}

/// Empties the output area after a failed or abandoned run.
async fn clear_outputs(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Err(e) = tokio::fs::remove_file(entry.path()).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial output {}: {}", entry.path().display(), e);
            }
        }
    }
}
