use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

use super::process::ProcessHandle;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Container duration in seconds as reported by `ffprobe`.
///
/// Any failure yields `None`; progress reporting then stays at 0 until the tool finishes.
/// Dropping the future kills the probe's process group.
pub async fn probe_duration(ffprobe: &Path, input: &Path) -> Option<f64> {
    let mut command = Command::new(ffprobe);
    command
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut process = match ProcessHandle::spawn(&mut command) {
        Ok(process) => process,
        Err(e) => {
            debug!("ffprobe could not be launched: {}", e);
            return None;
        }
    };
    let mut stdout = process.take_stdout()?;

    let run = async {
        let mut raw = Vec::new();
        stdout.read_to_end(&mut raw).await?;
        let status = process.wait().await?;
        Ok::<_, std::io::Error>((status, raw))
    };

    let (status, raw) = match tokio::time::timeout(PROBE_TIMEOUT, run).await {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => {
            debug!("ffprobe failed on {}: {}", input.display(), e);
            return None;
        }
        Err(_) => {
            debug!("ffprobe timed out on {}", input.display());
            return None;
        }
    };

    if !status.success() {
        debug!("ffprobe exited with {} on {}", status, input.display());
        return None;
    }

    parse_duration(&String::from_utf8_lossy(&raw))
}

/// Whether `path` names an executable, directly or via `PATH`.
pub fn tool_available(path: &Path) -> bool {
    which::which(path).is_ok()
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<f64>().ok())
        .find(|d| d.is_finite() && *d > 0.0)
}
