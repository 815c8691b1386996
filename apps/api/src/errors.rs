use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::render::compiler::CompileError;
use crate::render::pipeline::RenderError;
use crate::render::ratelimit::Decision;

/// Upper bound on the compiler diagnostic excerpt surfaced to callers.
const MAX_LOG_EXCERPT: usize = 2048;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limit exceeded")]
    RateLimited(Decision),

    #[error("Compilation failed")]
    CompilationFailed(String),

    #[error("Compilation timed out")]
    CompilationTimeout(std::time::Duration),

    /// Containment check failed. The detail never reaches the caller.
    #[error("Security violation")]
    Security(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<RenderError> for AppError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::RateLimited(decision) => AppError::RateLimited(decision),
            RenderError::Compile(CompileError::Failed { log }) => {
                AppError::CompilationFailed(log_excerpt(&log))
            }
            RenderError::Compile(CompileError::Timeout { elapsed, .. }) => {
                AppError::CompilationTimeout(elapsed)
            }
            RenderError::Compile(CompileError::Security { detail }) => AppError::Security(detail),
            RenderError::Compile(CompileError::Io(e)) => AppError::Internal(e.into()),
            RenderError::Payload(e) => AppError::Internal(e.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::RateLimited(decision) => return rate_limited_response(decision),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::CompilationFailed(excerpt) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "COMPILATION_FAILED",
                format!("PDF compilation failed:\n{excerpt}"),
            ),
            AppError::CompilationTimeout(elapsed) => (
                StatusCode::GATEWAY_TIMEOUT,
                "COMPILATION_TIMEOUT",
                format!("PDF compilation exceeded the {}s limit", elapsed.as_secs()),
            ),
            AppError::Security(detail) => {
                // Full detail stays in the logs; the caller sees nothing
                // that would map out the filesystem.
                tracing::error!("working directory containment violation: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "PDF_GENERATION_FAILED",
                    "PDF generation failed".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

fn rate_limited_response(decision: &Decision) -> Response {
    let reset: DateTime<Utc> = decision.reset_at.into();
    let retry_after = (reset - Utc::now()).num_seconds().max(0);

    let body = Json(json!({
        "error": {
            "code": "RATE_LIMITED",
            "message": "Too many PDF generation requests. Try again later.",
            "retry_after_seconds": retry_after,
            "reset_at": reset.to_rfc3339(),
        }
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
        response.headers_mut().insert("retry-after", value);
    }
    apply_rate_limit_headers(response.headers_mut(), decision);
    response
}

/// Emits the x-ratelimit-* trio. Used on denials and on successful
/// generation responses alike.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    let reset: DateTime<Utc> = decision.reset_at.into();
    let pairs = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", reset.to_rfc3339()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
}

/// Tail of the compiler log — LaTeX reports the actual error last.
fn log_excerpt(log: &str) -> String {
    if log.len() <= MAX_LOG_EXCERPT {
        return log.to_string();
    }
    let mut start = log.len() - MAX_LOG_EXCERPT;
    while start < log.len() && !log.is_char_boundary(start) {
        start += 1;
    }
    log[start..].to_string()
}
