#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use transcode_service::config::settings::AppConfig;
use transcode_service::modules::jobs::model::{Job, JobState};
use transcode_service::modules::jobs::service::JobManager;
use uuid::Uuid;

/// How the stand-in `ffmpeg` behaves.
#[derive(Debug, Clone, Copy)]
pub enum FakeFfmpeg {
    /// Emits progress for a 10s input and writes a small output file, or three
    /// parts when asked for a numbered pattern.
    Succeed,
    /// Prints diagnostics to stderr and exits 1.
    Fail,
    /// Exits 0 without writing anything.
    NoOutput,
    /// Forks a helper and blocks until killed.
    Hang,
    /// Floods stderr with more than a pipe buffer of output, starting with bytes that are not UTF-8.
    NoisyStderr,
}

impl FakeFfmpeg {
    fn script(&self) -> &'static str {
        match self {
            FakeFfmpeg::Succeed => {
                r#"#!/bin/sh
for last; do :; done
echo "out_time_us=2500000"
echo "progress=continue"
sleep 0.05
echo "out_time_us=5000000"
echo "out_time_us=4000000"
echo "out_time=00:00:07.500000"
echo "progress=end"
case "$last" in
  *%03d*)
    dir=$(dirname "$last")
    ext="${last##*.}"
    for n in 000 001 002; do printf "fake-part-$n" > "$dir/part_$n.$ext"; done
    ;;
  *)
    printf 'fake-transcoded-media' > "$last"
    ;;
esac
exit 0
"#
            }
            FakeFfmpeg::Fail => {
                r#"#!/bin/sh
echo "Input #0, matroska,webm, from 'input':" >&2
echo "Invalid data found when processing input" >&2
exit 1
"#
            }
            FakeFfmpeg::NoOutput => {
                r#"#!/bin/sh
echo "progress=end"
exit 0
"#
            }
            FakeFfmpeg::NoisyStderr => {
                r#"#!/bin/sh
for last; do :; done
printf 'title=\377\376Caf\351\n' >&2
i=0
while [ $i -lt 4000 ]; do
  echo "frame=$i fps=25.0 q=2.0 size=128kB time=00:00:04.00 bitrate=256.0kbits/s speed=1x" >&2
  i=$((i+1))
done
printf 'fake-transcoded-media' > "$last"
exit 0
"#
            }
            FakeFfmpeg::Hang => {
                r#"#!/bin/sh
sleep 30 &
echo "out_time_us=1000000"
wait
"#
            }
        }
    }
}

pub struct Tools {
    _dir: TempDir,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

pub fn fake_tools(mode: FakeFfmpeg) -> Tools {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = write_script(dir.path(), "ffmpeg", mode.script());
    let ffprobe = write_script(dir.path(), "ffprobe", "#!/bin/sh\necho 10.000000\n");
    Tools {
        _dir: dir,
        ffmpeg,
        ffprobe,
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn test_config(root: &Path, tools: &Tools) -> AppConfig {
    AppConfig {
        server_port: 0,
        workspace_root: root.to_path_buf(),
        max_source_bytes: 64 * 1024,
        allowed_schemes: vec!["http".into(), "https".into()],
        allowed_mime_types: vec!["video/*".into(), "audio/*".into()],
        fetch_timeout_secs: 5,
        fetch_redirect_limit: 3,
        transcode_timeout_secs: 10,
        job_deadline_secs: 20,
        cancel_grace_secs: 5,
        max_concurrent_transcodes: 2,
        max_pending_jobs: 8,
        disk_quota_bytes: 64 * 1024 * 1024,
        workspace_reservation_bytes: 1024 * 1024,
        result_retention_secs: 3600,
        ffmpeg_path: tools.ffmpeg.clone(),
        ffprobe_path: tools.ffprobe.clone(),
        diagnostic_tail_lines: 5,
    }
}

pub struct Harness {
    pub manager: JobManager,
    pub config: AppConfig,
    pub root: TempDir,
    pub tools: Tools,
}

pub async fn harness(mode: FakeFfmpeg, tweak: impl FnOnce(&mut AppConfig)) -> Harness {
    let tools = fake_tools(mode);
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(&root.path().join("workspaces"), &tools);
    tweak(&mut config);
    let manager = JobManager::from_config(&config).await.unwrap();
    Harness {
        manager,
        config,
        root,
        tools,
    }
}

impl Harness {
    /// Swaps the stand-in `ffprobe` for a script with the given body.
    pub fn set_ffprobe(&self, body: &str) {
        let dir = self.tools.ffprobe.parent().unwrap();
        write_script(dir, "ffprobe", body);
    }

    pub fn workspace_dir(&self, id: Uuid) -> PathBuf {
        self.config.workspace_root.join(id.to_string())
    }
}

pub async fn wait_terminal(manager: &JobManager, id: Uuid) -> Job {
    wait_for_state(manager, id, |state| state.is_terminal()).await
}

pub async fn wait_for_state(
    manager: &JobManager,
    id: Uuid,
    done: impl Fn(JobState) -> bool,
) -> Job {
    let mut rx = manager.subscribe(id).await.unwrap();
    let waited = tokio::time::timeout(Duration::from_secs(15), async {
        rx.wait_for(|job| done(job.state)).await.map(|job| job.clone())
    })
    .await;
    match waited {
        Ok(Ok(job)) => job,
        _ => panic!("job {} did not reach the expected state", id),
    }
}

pub fn media_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
