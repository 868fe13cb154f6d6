use crate::config::settings::AppConfig;
use crate::modules::jobs::service::JobManager;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub jobs: JobManager,
}

impl AppState {
    pub fn new(config: AppConfig, jobs: JobManager) -> Self {
        Self { config, jobs }
    }
}
