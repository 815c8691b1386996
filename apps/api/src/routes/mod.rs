pub mod health;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::render::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // PDF generation
        .route("/api/v1/pdf/resume", post(handlers::handle_resume_pdf))
        .route(
            "/api/v1/pdf/cover-letter",
            post(handlers::handle_cover_letter_pdf),
        )
        // Administrative surface
        .route("/api/v1/pdf/cache/stats", get(handlers::handle_cache_stats))
        .route("/api/v1/pdf/cache", delete(handlers::handle_cache_clear))
        .route("/api/v1/pdf/limits", get(handlers::handle_limits))
        .route(
            "/api/v1/pdf/limits/reset",
            post(handlers::handle_limiter_reset),
        )
        .with_state(state)
}
