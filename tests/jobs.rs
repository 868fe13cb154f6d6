#![cfg(unix)]

mod common;

use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use transcode_service::common::error::JobError;
use transcode_service::common::upload::UploadStager;
use transcode_service::modules::jobs::model::{FailureComponent, JobState};
use transcode_service::modules::source::model::SourceReference;
use transcode_service::workers::options::{TranscodeOptions, TrimRange};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{FakeFfmpeg, harness, media_bytes, wait_for_state, wait_terminal};

fn mp3() -> TranscodeOptions {
    TranscodeOptions {
        format: "mp3".into(),
        audio_bitrate_kbps: Some(128),
        ..Default::default()
    }
}

async fn media_server(route: &str, body: Vec<u8>, content_type: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, content_type))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn remote_source_is_transcoded_and_download_releases_workspace() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let server = media_server("/media/clip.mp4", media_bytes(1024), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/media/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Succeeded, "{:?}", job.error);
    assert_eq!(job.progress, 100);
    assert_eq!(job.bytes_fetched, 1024);
    let input = job.input.unwrap();
    assert_eq!(input.file_name, "clip.mp4");
    assert_eq!(input.content_type, "video/mp4");
    let output = job.output.unwrap();
    assert_eq!(output.file_name, "clip.mp3");
    assert_eq!(output.content_type, "audio/mpeg");
    assert!(h.workspace_dir(id).exists());

    let result = h.manager.fetch_result(id).await.unwrap();
    assert_eq!(result.bytes, "fake-transcoded-media".len() as u64);
    let chunks: Vec<Bytes> = result
        .into_stream()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(chunks.concat(), b"fake-transcoded-media");

    assert!(!h.workspace_dir(id).exists());
    assert_eq!(h.manager.store().active_count(), 0);
    assert!(h.manager.status(id).await.unwrap().consumed);
    assert!(matches!(
        h.manager.fetch_result(id).await,
        Err(JobError::NotFound(_))
    ));
}

async fn read_all(result: transcode_service::modules::jobs::service::JobResult) -> Vec<u8> {
    let chunks: Vec<Bytes> = result
        .into_stream()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    chunks.concat()
}

#[tokio::test]
async fn split_output_is_delivered_part_by_part() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let server = media_server("/talks/lecture.mp3", media_bytes(2048), "audio/mpeg").await;
    let options = TranscodeOptions {
        format: "wav".into(),
        sample_rate: Some(16000),
        channels: Some(1),
        segment_secs: Some(300),
        ..Default::default()
    };

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/talks/lecture.mp3", server.uri())), options)
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Succeeded, "{:?}", job.error);
    assert!(job.output.is_none());
    let names: Vec<_> = job.parts.iter().map(|p| p.file_name.as_str()).collect();
    assert_eq!(
        names,
        ["lecture_part_001.wav", "lecture_part_002.wav", "lecture_part_003.wav"]
    );

    assert!(matches!(
        h.manager.fetch_result(id).await,
        Err(JobError::SplitResult { parts: 3, .. })
    ));
    assert!(matches!(
        h.manager.fetch_part(id, 4).await,
        Err(JobError::PartNotFound { index: 4, .. })
    ));
    assert!(matches!(
        h.manager.fetch_part(id, 0).await,
        Err(JobError::PartNotFound { index: 0, .. })
    ));

    let second = h.manager.fetch_part(id, 2).await.unwrap();
    assert_eq!(second.content_type, "audio/wav");
    assert_eq!(read_all(second).await, b"fake-part-001");
    assert_eq!(read_all(h.manager.fetch_part(id, 1).await.unwrap()).await, b"fake-part-000");
    assert!(h.workspace_dir(id).exists());
    assert!(!h.manager.status(id).await.unwrap().consumed);

    assert_eq!(read_all(h.manager.fetch_part(id, 3).await.unwrap()).await, b"fake-part-002");
    assert!(!h.workspace_dir(id).exists());
    assert!(h.manager.status(id).await.unwrap().consumed);
    assert!(matches!(
        h.manager.fetch_part(id, 1).await,
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn video_output_cannot_be_split() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let options = TranscodeOptions {
        format: "mp4".into(),
        segment_secs: Some(300),
        ..Default::default()
    };
    let id = h
        .manager
        .submit(SourceReference::Url("https://media.example.test/a.mp4".into()), options)
        .await
        .unwrap();

    let job = h.manager.status(id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, "invalid_options");
    assert!(!h.workspace_dir(id).exists());
}

#[tokio::test]
async fn unknown_format_fails_without_a_workspace() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let options = TranscodeOptions {
        format: "xyz".into(),
        ..Default::default()
    };

    let id = h
        .manager
        .submit(SourceReference::Url("https://media.example.test/a.mp4".into()), options)
        .await
        .unwrap();

    let job = h.manager.status(id).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.component, FailureComponent::Transcode);
    assert_eq!(error.kind, "invalid_options");
    assert!(!h.workspace_dir(id).exists());
    assert_eq!(h.manager.store().active_count(), 0);
}

#[tokio::test]
async fn oversized_remote_source_fails_and_frees_workspace() {
    let h = harness(FakeFfmpeg::Succeed, |c| c.max_source_bytes = 4096).await;
    let server = media_server("/big.mp4", media_bytes(16 * 1024), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/big.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.component, FailureComponent::Source);
    assert_eq!(error.kind, "too_large");
    assert!(job.bytes_fetched <= 4096);
    assert!(!h.workspace_dir(id).exists());
    assert_eq!(h.manager.store().active_count(), 0);
}

#[tokio::test]
async fn non_media_content_type_is_rejected() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let server = media_server("/page", b"<html></html>".to_vec(), "text/html").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/page", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, "unsupported_type");
}

#[tokio::test]
async fn unreachable_and_disallowed_sources_fail() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let missing = h
        .manager
        .submit(SourceReference::Url(format!("{}/gone.mp4", server.uri())), mp3())
        .await
        .unwrap();
    let ftp = h
        .manager
        .submit(SourceReference::Url("ftp://media.example.test/a.mp4".into()), mp3())
        .await
        .unwrap();

    assert_eq!(wait_terminal(&h.manager, missing).await.error.unwrap().kind, "unreachable");
    assert_eq!(wait_terminal(&h.manager, ftp).await.error.unwrap().kind, "disallowed_scheme");
}

/// Serves `len` media bytes without a Content-Length, closing the connection to end the body.
async fn unsized_media_server(len: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let head = "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nConnection: close\r\n\r\n";
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in media_bytes(len).chunks(1024) {
                    if socket.write_all(chunk).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}/stream.mp4", addr)
}

#[tokio::test]
async fn unsized_stream_is_cut_off_at_the_limit() {
    let h = harness(FakeFfmpeg::Succeed, |c| c.max_source_bytes = 4096).await;
    let url = unsized_media_server(64 * 1024).await;

    let id = h
        .manager
        .submit(SourceReference::Url(url), mp3())
        .await
        .unwrap();
    let snapshots: Vec<_> = h.manager.watch(id).await.unwrap().collect().await;

    let last = snapshots.last().unwrap();
    assert_eq!(last.state, JobState::Failed);
    let error = last.error.clone().unwrap();
    assert_eq!(error.component, FailureComponent::Source);
    assert_eq!(error.kind, "too_large");
    assert!(snapshots.iter().all(|job| job.bytes_fetched <= 4096));
    assert!(!h.workspace_dir(id).exists());
}

#[tokio::test]
async fn redirect_to_disallowed_scheme_is_refused() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/moved.mp4"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "ftp://media.example.test/clip.mp4"),
        )
        .mount(&server)
        .await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/moved.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let error = wait_terminal(&h.manager, id).await.error.unwrap();
    assert_eq!(error.kind, "disallowed_scheme");
    assert!(error.message.contains("ftp"));
}

#[tokio::test]
async fn slow_source_times_out() {
    let h = harness(FakeFfmpeg::Succeed, |c| c.fetch_timeout_secs = 1).await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.mp4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(media_bytes(512), "video/mp4")
                .set_delay(Duration::from_secs(4)),
        )
        .mount(&server)
        .await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/slow.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.component, FailureComponent::Source);
    assert_eq!(error.kind, "timeout");
    assert!(!h.workspace_dir(id).exists());
}

#[tokio::test]
async fn tool_failure_keeps_diagnostic_tail() {
    let h = harness(FakeFfmpeg::Fail, |_| {}).await;
    let server = media_server("/clip.mkv", media_bytes(512), "video/x-matroska").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mkv", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.kind, "tool_failed");
    assert!(error
        .diagnostic_tail
        .iter()
        .any(|line| line.contains("Invalid data found")));
    assert!(!h.workspace_dir(id).exists());
}

#[tokio::test]
async fn success_without_output_is_a_failure() {
    let h = harness(FakeFfmpeg::NoOutput, |_| {}).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.unwrap().kind, "empty_output");
}

#[tokio::test]
async fn non_utf8_diagnostics_do_not_stall_the_tool() {
    let h = harness(FakeFfmpeg::NoisyStderr, |c| c.transcode_timeout_secs = 10).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Succeeded, "{:?}", job.error);
    assert_eq!(job.progress, 100);
}

#[tokio::test]
async fn cancel_while_reading_duration_is_prompt() {
    let h = harness(FakeFfmpeg::Hang, |c| c.cancel_grace_secs = 5).await;
    h.set_ffprobe("#!/bin/sh\nsleep 8\necho 10.000000\n");
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();
    wait_for_state(&h.manager, id, |s| s == JobState::Transcoding).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    let job = h.manager.cancel(id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "cancel took {:?}",
        started.elapsed()
    );
    assert!(!h.workspace_dir(id).exists());
}

#[tokio::test]
async fn cancelling_a_running_transcode_removes_its_workspace() {
    let h = harness(FakeFfmpeg::Hang, |_| {}).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();
    wait_for_state(&h.manager, id, |s| s == JobState::Transcoding).await;
    assert!(h.workspace_dir(id).exists());

    let job = h.manager.cancel(id).await.unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(!h.workspace_dir(id).exists());
    assert_eq!(h.manager.store().active_count(), 0);

    let again = h.manager.cancel(id).await.unwrap();
    assert_eq!(again.state, JobState::Cancelled);
    assert!(matches!(
        h.manager.fetch_result(id).await,
        Err(JobError::NotReady { state: JobState::Cancelled, .. })
    ));
}

#[tokio::test]
async fn progress_and_states_only_move_forward() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let server = media_server("/clip.mp4", media_bytes(2048), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();
    let snapshots: Vec<_> = h.manager.watch(id).await.unwrap().collect().await;

    let last = snapshots.last().unwrap();
    assert_eq!(last.state, JobState::Succeeded);
    assert_eq!(last.progress, 100);

    let rank = |s: JobState| match s {
        JobState::Queued => 0,
        JobState::Fetching => 1,
        JobState::Transcoding => 2,
        _ => 3,
    };
    for pair in snapshots.windows(2) {
        assert!(pair[0].progress <= pair[1].progress);
        assert!(rank(pair[0].state) <= rank(pair[1].state));
    }
    assert!(snapshots
        .iter()
        .filter(|job| job.state != JobState::Succeeded)
        .all(|job| job.progress < 100));
}

#[tokio::test]
async fn concurrent_jobs_use_distinct_workspaces() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let server = MockServer::start().await;
    for name in ["a", "b", "c", "d"] {
        Mock::given(method("GET"))
            .and(path(format!("/{}.mp4", name)))
            .respond_with(ResponseTemplate::new(200).set_body_raw(media_bytes(256), "video/mp4"))
            .mount(&server)
            .await;
    }

    let mut ids = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let id = h
            .manager
            .submit(SourceReference::Url(format!("{}/{}.mp4", server.uri(), name)), mp3())
            .await
            .unwrap();
        ids.push(id);
    }

    for (id, name) in ids.iter().zip(["a", "b", "c", "d"]) {
        let job = wait_terminal(&h.manager, *id).await;
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.output.unwrap().file_name, format!("{}.mp3", name));
        assert!(h.workspace_dir(*id).exists());
    }
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 4);
    assert_eq!(h.manager.store().active_count(), 4);
}

#[tokio::test]
async fn admission_limit_rejects_with_overloaded() {
    let h = harness(FakeFfmpeg::Hang, |c| c.max_pending_jobs = 1).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;
    let url = format!("{}/clip.mp4", server.uri());

    let first = h
        .manager
        .submit(SourceReference::Url(url.clone()), mp3())
        .await
        .unwrap();
    let second = h.manager.submit(SourceReference::Url(url.clone()), mp3()).await;
    assert!(matches!(second, Err(JobError::Overloaded { limit: 1 })));

    h.manager.cancel(first).await.unwrap();
    // The slot frees once the first job is terminal.
    let third = h.manager.submit(SourceReference::Url(url), mp3()).await.unwrap();
    h.manager.cancel(third).await.unwrap();
}

#[tokio::test]
async fn job_deadline_bounds_the_whole_pipeline() {
    let h = harness(FakeFfmpeg::Hang, |c| c.job_deadline_secs = 1).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.component, FailureComponent::Pipeline);
    assert_eq!(error.kind, "deadline_exceeded");
    assert!(!h.workspace_dir(id).exists());
}

#[tokio::test]
async fn transcode_timeout_kills_the_tool() {
    let h = harness(FakeFfmpeg::Hang, |c| c.transcode_timeout_secs = 1).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    let error = job.error.unwrap();
    assert_eq!(error.component, FailureComponent::Transcode);
    assert_eq!(error.kind, "timeout");
}

#[tokio::test]
async fn exhausted_quota_fails_new_jobs() {
    let h = harness(FakeFfmpeg::Hang, |c| {
        c.disk_quota_bytes = 1024 * 1024;
        c.workspace_reservation_bytes = 1024 * 1024;
    })
    .await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;
    let url = format!("{}/clip.mp4", server.uri());

    let first = h.manager.submit(SourceReference::Url(url.clone()), mp3()).await.unwrap();
    let second = h.manager.submit(SourceReference::Url(url), mp3()).await.unwrap();

    let job = h.manager.status(second).await.unwrap();
    assert_eq!(job.state, JobState::Failed);
    let error = job.error.unwrap();
    assert_eq!(error.component, FailureComponent::Workspace);
    assert_eq!(error.kind, "exhausted");

    h.manager.cancel(first).await.unwrap();
}

#[tokio::test]
async fn uploaded_source_with_prefix_and_trim() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;

    let mut stager = UploadStager::new(&h.manager.store().staging_dir(), h.config.max_source_bytes).unwrap();
    stager.write_chunk(Bytes::from(media_bytes(2048))).await.unwrap();
    let upload = stager
        .finish(Some("talk.webm".into()), Some("video/webm".into()))
        .await
        .unwrap();

    let options = TranscodeOptions {
        format: "wav".into(),
        sample_rate: Some(16000),
        channels: Some(1),
        trim: Some(TrimRange {
            start_secs: 1.0,
            end_secs: 5.0,
        }),
        filename_prefix: Some("lecture".into()),
        ..Default::default()
    };
    let id = h
        .manager
        .submit(SourceReference::Upload(upload), options)
        .await
        .unwrap();

    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.state, JobState::Succeeded, "{:?}", job.error);
    assert_eq!(job.input.unwrap().bytes, 2048);
    let output = job.output.unwrap();
    assert_eq!(output.file_name, "lecture_talk.wav");
    assert_eq!(output.content_type, "audio/wav");
    // Staged upload was claimed, not copied and left behind.
    assert_eq!(std::fs::read_dir(h.manager.store().staging_dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn oversized_upload_fails_too_large() {
    let h = harness(FakeFfmpeg::Succeed, |c| c.max_source_bytes = 1024).await;

    let mut stager = UploadStager::new(&h.manager.store().staging_dir(), 1024).unwrap();
    stager.write_chunk(Bytes::from(media_bytes(4096))).await.unwrap();
    let upload = stager.finish(Some("big.mp4".into()), None).await.unwrap();

    let id = h
        .manager
        .submit(SourceReference::Upload(upload), mp3())
        .await
        .unwrap();
    let job = wait_terminal(&h.manager, id).await;
    assert_eq!(job.error.unwrap().kind, "too_large");
    assert!(!h.workspace_dir(id).exists());
}

#[tokio::test]
async fn unknown_and_unfinished_jobs() {
    let h = harness(FakeFfmpeg::Hang, |_| {}).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let missing = Uuid::new_v4();
    assert!(matches!(h.manager.status(missing).await, Err(JobError::NotFound(_))));
    assert!(matches!(h.manager.cancel(missing).await, Err(JobError::NotFound(_))));
    assert!(matches!(h.manager.fetch_result(missing).await, Err(JobError::NotFound(_))));

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();
    assert!(matches!(
        h.manager.fetch_result(id).await,
        Err(JobError::NotReady { .. })
    ));
    h.manager.cancel(id).await.unwrap();
}

#[tokio::test]
async fn expired_jobs_are_swept() {
    let h = harness(FakeFfmpeg::Succeed, |c| c.result_retention_secs = 0).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();
    assert_eq!(wait_terminal(&h.manager, id).await.state, JobState::Succeeded);
    assert!(h.workspace_dir(id).exists());

    assert_eq!(h.manager.sweep_expired().await, 1);
    assert!(!h.workspace_dir(id).exists());
    assert!(matches!(h.manager.status(id).await, Err(JobError::NotFound(_))));
}

#[tokio::test]
async fn shutdown_cancels_running_jobs() {
    let h = harness(FakeFfmpeg::Hang, |_| {}).await;
    let server = media_server("/clip.mp4", media_bytes(512), "video/mp4").await;

    let id = h
        .manager
        .submit(SourceReference::Url(format!("{}/clip.mp4", server.uri())), mp3())
        .await
        .unwrap();
    wait_for_state(&h.manager, id, |s| s == JobState::Transcoding).await;

    tokio::time::timeout(Duration::from_secs(10), h.manager.shutdown())
        .await
        .unwrap();
    assert_eq!(h.manager.status(id).await.unwrap().state, JobState::Cancelled);
    assert_eq!(h.manager.store().active_count(), 0);
}

#[tokio::test]
async fn recover_clears_leftovers() {
    let h = harness(FakeFfmpeg::Succeed, |_| {}).await;
    let stale = h.config.workspace_root.join(Uuid::new_v4().to_string()).join("input");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("left.mp4"), b"x").unwrap();

    assert_eq!(h.manager.store().recover().await.unwrap(), 2);
    assert!(!stale.exists());
    assert!(h.manager.store().staging_dir().exists());
}
