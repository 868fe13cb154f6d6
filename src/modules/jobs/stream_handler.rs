use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{Stream, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::common::response::ApiError;
use crate::modules::jobs::service::JobResult;
use crate::state::AppState;

/// Server-sent job snapshots until the job reaches a terminal state.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/events",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Stream of `job` events", body = String, content_type = "text/event-stream"),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs"
)]
pub async fn job_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let updates = state.jobs.watch(id).await?;

    let events = updates.map(move |job| {
        let event = Event::default().event("job").json_data(&job).unwrap_or_else(|e| {
            warn!(job_id = %id, "Failed to encode job event: {}", e);
            Event::default().event("error").data(e.to_string())
        });
        Ok(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Streams the artifact. Reading it to the end frees the job's workspace;
/// otherwise it stays until the retention window closes.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/result",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Transcoded artifact", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "Job or artifact not found"),
        (status = 409, description = "Job has not succeeded, or its result is split into parts")
    ),
    tag = "Jobs"
)]
pub async fn download_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let result = state.jobs.fetch_result(id).await?;
    info!(job_id = %id, "📤 Serving result {} ({} bytes)", result.file_name, result.bytes);
    Ok(attachment(result))
}

/// Streams one part of a split result. Once every part has been read to the
/// end the job's workspace is freed.
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/parts/{number}",
    params(
        ("id" = Uuid, Path, description = "Job ID"),
        ("number" = usize, Path, description = "Part number, starting at 1")
    ),
    responses(
        (status = 200, description = "One part of a split artifact", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "Job or part not found"),
        (status = 409, description = "Job has not succeeded")
    ),
    tag = "Jobs"
)]
pub async fn download_part(
    State(state): State<AppState>,
    Path((id, number)): Path<(Uuid, usize)>,
) -> Result<Response, ApiError> {
    let result = state.jobs.fetch_part(id, number).await?;
    info!(job_id = %id, "📤 Serving part {} {} ({} bytes)", number, result.file_name, result.bytes);
    Ok(attachment(result))
}

fn attachment(result: JobResult) -> Response {
    let headers = [
        (header::CONTENT_TYPE, result.content_type.clone()),
        (header::CONTENT_LENGTH, result.bytes.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", result.file_name),
        ),
    ];

    (headers, Body::from_stream(result.into_stream())).into_response()
}
