use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::workers::options::TranscodeOptions;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateJobRequest {
    #[validate(length(min = 1, max = 2048, message = "url must be 1-2048 characters"))]
    #[validate(url(message = "url must be an absolute URL"))]
    pub url: String,
    pub options: TranscodeOptions,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobAccepted {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub ffmpeg_available: bool,
    pub ffprobe_available: bool,
    pub pending_jobs: usize,
    pub active_workspaces: usize,
    pub reserved_bytes: u64,
}
