mod config;
mod errors;
mod models;
mod render;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::render::cache::{CacheConfig, PdfCache};
use crate::render::clock::{Clock, SystemClock};
use crate::render::compiler::{CompilerConfig, DocumentCompiler, LatexCompiler};
use crate::render::pipeline::RenderPipeline;
use crate::render::ratelimit::RateLimiter;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on unparseable env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Papermill API v{}", env!("CARGO_PKG_VERSION"));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Admission budgets: one for expensive compilation, one for the
    // cheap admin surface. Each owns a background sweep.
    let compile_limiter = Arc::new(RateLimiter::new(
        config.compile_rate_limit,
        config.rate_window,
        clock.clone(),
    ));
    let api_limiter = Arc::new(RateLimiter::new(
        config.api_rate_limit,
        config.rate_window,
        clock.clone(),
    ));
    let _compile_sweeper = compile_limiter.clone().start_sweeper(config.rate_sweep_period);
    let _api_sweeper = api_limiter.clone().start_sweeper(config.rate_sweep_period);
    info!(
        "Rate limits: {}/compile, {}/api per {:?}",
        config.compile_rate_limit, config.api_rate_limit, config.rate_window
    );

    // Artifact cache
    let cache = PdfCache::new(
        CacheConfig {
            root: config.cache_dir.clone(),
            max_age: config.cache_max_age,
            max_total_bytes: config.cache_max_bytes,
        },
        clock.clone(),
    )
    .await?;
    info!("PDF cache ready at {}", config.cache_dir.display());

    // LaTeX toolchain behind the compiler seam
    let compiler: Arc<dyn DocumentCompiler> = Arc::new(LatexCompiler::new(CompilerConfig {
        command: config.latex_command.clone(),
        args: config.latex_args.clone(),
        compile_root: config.compile_root.clone(),
        project_root: config.project_root.clone(),
        timeout: config.compile_timeout,
        max_log_bytes: config.compile_max_log_bytes,
    }));
    info!("Compiler: {} (timeout {:?})", config.latex_command, config.compile_timeout);

    let pipeline = Arc::new(RenderPipeline::new(
        compile_limiter.clone(),
        cache,
        compiler,
    ));

    // Build app state
    let state = AppState {
        config: config.clone(),
        pipeline,
        compile_limiter,
        api_limiter,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
