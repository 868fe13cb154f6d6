use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::common::upload::stage_field;
use crate::modules::jobs::dto::*;
use crate::modules::jobs::model::Job;
use crate::modules::source::model::{SourceReference, UploadHandle};
use crate::state::AppState;
use crate::workers::options::{DEFAULT_FORMAT, TranscodeOptions};
use crate::workers::probe::tool_available;

#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service health", body = ApiResponse<HealthResponse>)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.jobs.store();
    let body = HealthResponse {
        status: "ok".to_string(),
        ffmpeg_available: tool_available(&state.config.ffmpeg_path),
        ffprobe_available: tool_available(&state.config.ffprobe_path),
        pending_jobs: state.jobs.pending_jobs(),
        active_workspaces: store.active_count(),
        reserved_bytes: store.reserved_bytes(),
    };
    ApiSuccess(ApiResponse::success(body, "Service is running"), StatusCode::OK)
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job accepted", body = ApiResponse<JobAccepted>),
        (status = 400, description = "Invalid request"),
        (status = 503, description = "Too many jobs in flight")
    ),
    tag = "Jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()
        .map_err(|e| ApiError(e.to_string(), StatusCode::BAD_REQUEST))?;

    let job_id = state
        .jobs
        .submit(SourceReference::Url(req.url), req.options)
        .await?;

    Ok(ApiSuccess(
        ApiResponse::success(JobAccepted { job_id }, "Job accepted"),
        StatusCode::ACCEPTED,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/upload",
    request_body(content = String, content_type = "multipart/form-data", description = "`file` part with the media and an optional `options` part with JSON transcode options (defaults to mp3)"),
    responses(
        (status = 202, description = "Job accepted", body = ApiResponse<JobAccepted>),
        (status = 400, description = "Missing or malformed parts"),
        (status = 413, description = "Request body exceeds the upload limit"),
        (status = 503, description = "Too many jobs in flight")
    ),
    tag = "Jobs"
)]
pub async fn upload_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    // Admission comes first so rejected requests never reach the staging area.
    let ticket = state.jobs.admit()?;
    let staging_dir = state.jobs.store().staging_dir();
    let max_bytes = state.config.max_source_bytes;

    let mut upload: Option<UploadHandle> = None;
    let mut options: Option<TranscodeOptions> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            // The body limit cuts the request off once an oversized file part is drained.
            Err(e) if upload.as_ref().is_some_and(UploadHandle::truncated) => {
                warn!("Multipart body ended early after an oversized upload: {}", e);
                break;
            }
            Err(e) => return Err(ApiError(e.body_text(), e.status())),
        };

        match field.name().unwrap_or("") {
            "file" => {
                let handle = stage_field(&staging_dir, max_bytes, field)
                    .await
                    .map_err(|e| ApiError(e.to_string(), StatusCode::BAD_REQUEST))?;
                upload = Some(handle);
            }
            "options" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError(e.body_text(), e.status()))?;
                let parsed = serde_json::from_str::<TranscodeOptions>(&text).map_err(|e| {
                    ApiError(format!("invalid options: {}", e), StatusCode::BAD_REQUEST)
                })?;
                options = Some(parsed);
            }
            other => {
                warn!("Ignoring unexpected multipart field '{}'", other);
            }
        }
    }

    let upload = upload.ok_or_else(|| {
        ApiError("missing 'file' part".to_string(), StatusCode::BAD_REQUEST)
    })?;
    let options = options.unwrap_or_else(|| TranscodeOptions {
        format: DEFAULT_FORMAT.to_string(),
        ..Default::default()
    });

    info!(
        "📤 Upload received: {:?} ({} bytes)",
        upload.file_name(),
        upload.received_bytes()
    );

    let job_id = state
        .jobs
        .submit_admitted(ticket, SourceReference::Upload(upload), options)
        .await;

    Ok(ApiSuccess(
        ApiResponse::success(JobAccepted { job_id }, "Job accepted"),
        StatusCode::ACCEPTED,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    responses(
        (status = 200, description = "All known jobs, newest first", body = ApiResponse<Vec<Job>>)
    ),
    tag = "Jobs"
)]
pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    let jobs = state.jobs.list().await;
    ApiSuccess(ApiResponse::success(jobs, "Jobs retrieved"), StatusCode::OK)
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job snapshot", body = ApiResponse<Job>),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.status(id).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Job retrieved"),
        StatusCode::OK,
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job after cancellation", body = ApiResponse<Job>),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.jobs.cancel(id).await?;
    Ok(ApiSuccess(
        ApiResponse::success(job, "Job cancelled"),
        StatusCode::OK,
    ))
}
