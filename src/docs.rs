use utoipa::OpenApi;

use crate::modules::jobs::dto::{CreateJobRequest, HealthResponse, JobAccepted};
use crate::modules::jobs::model::{ArtifactInfo, FailureComponent, Job, JobFailure, JobState};
use crate::modules::source::model::SourceSummary;
use crate::workers::options::{TranscodeOptions, TrimRange};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::jobs::handler::health,
        crate::modules::jobs::handler::create_job,
        crate::modules::jobs::handler::upload_job,
        crate::modules::jobs::handler::list_jobs,
        crate::modules::jobs::handler::get_job,
        crate::modules::jobs::handler::cancel_job,
        crate::modules::jobs::stream_handler::job_events,
        crate::modules::jobs::stream_handler::download_result,
        crate::modules::jobs::stream_handler::download_part,
    ),
    components(
        schemas(
            CreateJobRequest, JobAccepted, HealthResponse,
            Job, JobState, JobFailure, FailureComponent, ArtifactInfo,
            SourceSummary, TranscodeOptions, TrimRange,
        )
    ),
    tags(
        (name = "Health", description = "Liveness and tool availability"),
        (name = "Jobs", description = "Media acquisition and transcoding jobs")
    )
)]
pub struct ApiDoc;
