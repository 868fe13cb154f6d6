use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

pub mod dto;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;
pub mod stream_handler;

const JSON_BODY_LIMIT: usize = 64 * 1024;

pub fn router(state: AppState) -> Router<AppState> {
    let upload_limit = state.config.upload_body_limit();

    let upload_routes = Router::new().route(
        "/jobs/upload",
        post(handler::upload_job).layer(DefaultBodyLimit::max(upload_limit)),
    );

    let job_routes = Router::new()
        .route("/jobs", get(handler::list_jobs).post(handler::create_job))
        .route("/jobs/{id}", get(handler::get_job))
        .route("/jobs/{id}/cancel", post(handler::cancel_job))
        .route("/jobs/{id}/events", get(stream_handler::job_events))
        .route("/jobs/{id}/result", get(stream_handler::download_result))
        .route("/jobs/{id}/parts/{number}", get(stream_handler::download_part))
        .layer(RequestBodyLimitLayer::new(JSON_BODY_LIMIT));

    upload_routes.merge(job_routes)
}
