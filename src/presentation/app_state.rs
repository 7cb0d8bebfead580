// Application state for HTTP handlers
use crate::application::reading_service::ReadingService;
use crate::application::sampler::Sampler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub reading_service: ReadingService,
    pub sampler: Arc<Sampler>,
}
