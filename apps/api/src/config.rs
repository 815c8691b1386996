use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Every knob has a default so a bare `cargo run` serves locally.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,

    pub cache_dir: PathBuf,
    pub cache_max_age: Duration,
    pub cache_max_bytes: u64,

    /// Root the compiler's working directories must resolve under.
    pub project_root: PathBuf,
    pub compile_root: PathBuf,
    pub latex_command: String,
    pub latex_args: Vec<String>,
    pub compile_timeout: Duration,
    pub compile_max_log_bytes: usize,

    pub compile_rate_limit: u32,
    pub api_rate_limit: u32,
    pub rate_window: Duration,
    pub rate_sweep_period: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            port: env_parse("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info"),

            cache_dir: PathBuf::from(env_or("PDF_CACHE_DIR", "./data/pdf-cache")),
            cache_max_age: Duration::from_secs(env_parse("PDF_CACHE_MAX_AGE_SECS", 86_400)?),
            cache_max_bytes: env_parse("PDF_CACHE_MAX_BYTES", 100 * 1024 * 1024)?,

            project_root: PathBuf::from(env_or("PROJECT_ROOT", ".")),
            compile_root: PathBuf::from(env_or("COMPILE_ROOT", "./data/compile")),
            latex_command: env_or("LATEX_COMMAND", "pdflatex"),
            latex_args: env_or("LATEX_ARGS", "-interaction=nonstopmode -halt-on-error")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            compile_timeout: Duration::from_secs(env_parse("COMPILE_TIMEOUT_SECS", 30)?),
            compile_max_log_bytes: env_parse("COMPILE_MAX_LOG_BYTES", 10 * 1024 * 1024)?,

            compile_rate_limit: env_parse("COMPILE_RATE_LIMIT", 5)?,
            api_rate_limit: env_parse("API_RATE_LIMIT", 30)?,
            rate_window: Duration::from_secs(env_parse("RATE_WINDOW_SECS", 60)?),
            rate_sweep_period: Duration::from_secs(env_parse("RATE_SWEEP_SECS", 60)?),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' must be a valid value, got '{raw}'")),
        Err(_) => Ok(default),
    }
}
