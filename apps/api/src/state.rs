use std::sync::Arc;

use crate::config::Config;
use crate::render::pipeline::RenderPipeline;
use crate::render::ratelimit::RateLimiter;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// The whole generation path: admission → hash → cache → compile.
    pub pipeline: Arc<RenderPipeline>,
    /// Expensive-compilation budget. The pipeline consults it on every
    /// generate; held here too for the stats/reset admin surface.
    pub compile_limiter: Arc<RateLimiter>,
    /// Cheap budget for the stats/clear/reset endpoints.
    pub api_limiter: Arc<RateLimiter>,
}
