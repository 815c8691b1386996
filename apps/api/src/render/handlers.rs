//! Axum route handlers for the PDF generation API.

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{apply_rate_limit_headers, AppError};
use crate::models::document::{CoverLetterPayload, DocumentPayload, ResumePayload};
use crate::render::cache::CacheStats;
use crate::render::pipeline::RenderedPdf;
use crate::render::ratelimit::{Decision, LimiterStats, RateLimiter};
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ResumePdfRequest {
    pub user_id: Uuid,
    /// Bypasses the cache read and write for a guaranteed re-render.
    #[serde(default)]
    pub fresh: bool,
    pub payload: ResumePayload,
}

#[derive(Debug, Deserialize)]
pub struct CoverLetterPdfRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub fresh: bool,
    pub payload: CoverLetterPayload,
}

#[derive(Debug, Deserialize)]
pub struct LimiterResetRequest {
    pub identifier: String,
}

#[derive(Debug, Serialize)]
pub struct LimiterResetResponse {
    pub identifier: String,
    pub compile_cleared: bool,
    pub api_cleared: bool,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub deleted: usize,
}

#[derive(Debug, Serialize)]
pub struct LimitsResponse {
    pub compile: LimiterStats,
    pub api: LimiterStats,
}

// ────────────────────────────────────────────────────────────────────────────
// Generation handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/pdf/resume
///
/// Compiles the resume payload to PDF, served from the artifact cache
/// when the content hash matches a previous compilation.
pub async fn handle_resume_pdf(
    State(state): State<AppState>,
    Json(request): Json<ResumePdfRequest>,
) -> Result<Response, AppError> {
    let payload = DocumentPayload::Resume(request.payload);
    render_pdf(&state, request.user_id, payload, request.fresh).await
}

/// POST /api/v1/pdf/cover-letter
pub async fn handle_cover_letter_pdf(
    State(state): State<AppState>,
    Json(request): Json<CoverLetterPdfRequest>,
) -> Result<Response, AppError> {
    let payload = DocumentPayload::CoverLetter(request.payload);
    render_pdf(&state, request.user_id, payload, request.fresh).await
}

async fn render_pdf(
    state: &AppState,
    user_id: Uuid,
    payload: DocumentPayload,
    fresh: bool,
) -> Result<Response, AppError> {
    payload.validate().map_err(AppError::Validation)?;
    let rendered = state
        .pipeline
        .generate(&user_id.to_string(), &payload, fresh)
        .await?;
    Ok(pdf_response(rendered))
}

fn pdf_response(rendered: RenderedPdf) -> Response {
    let mut response = (StatusCode::OK, rendered.bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/pdf"),
    );
    headers.insert(
        "x-cache",
        HeaderValue::from_static(rendered.cache_status.as_str()),
    );
    apply_rate_limit_headers(headers, &rendered.decision);
    response
}

// ────────────────────────────────────────────────────────────────────────────
// Administrative handlers (cheap-API budget)
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/pdf/cache/stats
pub async fn handle_cache_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CacheStats>, AppError> {
    admit(&state.api_limiter, &headers)?;
    Ok(Json(state.pipeline.cache().stats().await))
}

/// DELETE /api/v1/pdf/cache
pub async fn handle_cache_clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CacheClearResponse>, AppError> {
    admit(&state.api_limiter, &headers)?;
    let deleted = state.pipeline.cache().clear().await;
    tracing::info!("cache cleared: {deleted} entries deleted");
    Ok(Json(CacheClearResponse { deleted }))
}

/// GET /api/v1/pdf/limits
pub async fn handle_limits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LimitsResponse>, AppError> {
    admit(&state.api_limiter, &headers)?;
    Ok(Json(LimitsResponse {
        compile: state.compile_limiter.stats(),
        api: state.api_limiter.stats(),
    }))
}

/// POST /api/v1/pdf/limits/reset
///
/// Administrative escape hatch: drops the identifier's windows in both
/// budgets immediately.
pub async fn handle_limiter_reset(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LimiterResetRequest>,
) -> Result<Json<LimiterResetResponse>, AppError> {
    admit(&state.api_limiter, &headers)?;
    let compile_cleared = state.compile_limiter.reset(&request.identifier);
    let api_cleared = state.api_limiter.reset(&request.identifier);
    Ok(Json(LimiterResetResponse {
        identifier: request.identifier,
        compile_cleared,
        api_cleared,
    }))
}

fn admit(limiter: &RateLimiter, headers: &HeaderMap) -> Result<Decision, AppError> {
    let decision = limiter.check(&client_id(headers));
    if !decision.allowed {
        return Err(AppError::RateLimited(decision));
    }
    Ok(decision)
}

fn client_id(headers: &HeaderMap) -> String {
    headers
        .get("x-client-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}
