//! LaTeX compilation under containment.
//!
//! Flow: verify the compile root resolves under the project root →
//! allocate a per-invocation arena inside it → write `main.tex` →
//! spawn the compiler with an argument vector, piped output, and a
//! wall-clock timeout → harvest `main.pdf`. The arena is disposed when
//! the invocation returns, so concurrent compilations never share
//! intermediate files.
//!
//! Captured stdout/stderr is hard-capped while streaming; a compiler
//! that out-talks the cap is drained to /dev/null so it cannot block
//! on a full pipe. A timed-out compiler is killed, not abandoned.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const SOURCE_FILENAME: &str = "main.tex";
pub const OUTPUT_FILENAME: &str = "main.pdf";

#[derive(Debug, Error)]
pub enum CompileError {
    /// Containment check failed. `detail` is for internal logs only;
    /// callers see a generic failure.
    #[error("compile workspace rejected")]
    Security { detail: String },

    #[error("compiler exited with an error")]
    Failed { log: String },

    #[error("compiler timed out after {elapsed:?}")]
    Timeout { elapsed: Duration, log: String },

    #[error("compile I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Compiler executable, invoked directly (never through a shell).
    pub command: String,
    /// Fixed arguments; the source filename is appended last.
    pub args: Vec<String>,
    /// Directory that holds per-invocation arenas. Must resolve under
    /// `project_root`.
    pub compile_root: PathBuf,
    pub project_root: PathBuf,
    pub timeout: Duration,
    pub max_log_bytes: usize,
}

/// Seam between the pipeline and the external toolchain, so the
/// pipeline is testable without LaTeX installed.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Compiles rendered source to PDF bytes.
    async fn compile(&self, source: &str) -> Result<Vec<u8>, CompileError>;
}

pub struct LatexCompiler {
    config: CompilerConfig,
}

impl LatexCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Resolves the compile root and verifies by prefix containment
    /// that it sits under the project root. Runs before anything is
    /// written or spawned.
    async fn contained_root(&self) -> Result<PathBuf, CompileError> {
        fs::create_dir_all(&self.config.compile_root).await?;
        let root = fs::canonicalize(&self.config.compile_root).await?;
        let project = fs::canonicalize(&self.config.project_root).await?;
        if !root.starts_with(&project) {
            return Err(CompileError::Security {
                detail: format!(
                    "compile root {} resolves outside project root {}",
                    root.display(),
                    project.display()
                ),
            });
        }
        Ok(root)
    }
}

#[async_trait]
impl DocumentCompiler for LatexCompiler {
    async fn compile(&self, source: &str) -> Result<Vec<u8>, CompileError> {
        let root = self.contained_root().await?;
        let arena = tempfile::tempdir_in(&root)?;
        fs::write(arena.path().join(SOURCE_FILENAME), source).await?;

        debug!(
            "compiling in {} via {}",
            arena.path().display(),
            self.config.command
        );

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .arg(SOURCE_FILENAME)
            .current_dir(arena.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let cap = self.config.max_log_bytes as u64;
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();

        let run = async {
            tokio::try_join!(
                read_capped(stdout.as_mut(), cap, &mut out_buf),
                read_capped(stderr.as_mut(), cap, &mut err_buf),
            )?;
            child.wait().await
        };
        let waited = timeout(self.config.timeout, run).await;

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to kill timed-out compiler: {e}");
                }
                return Err(CompileError::Timeout {
                    elapsed: self.config.timeout,
                    log: combine_log(&out_buf, &err_buf, self.config.max_log_bytes),
                });
            }
        };

        let log = combine_log(&out_buf, &err_buf, self.config.max_log_bytes);
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(CompileError::Failed {
                log: format!("exit code {code}\n{log}"),
            });
        }

        // Exit-zero without the expected output is still a failure.
        match fs::read(arena.path().join(OUTPUT_FILENAME)).await {
            Ok(bytes) => {
                debug!("compiled {} bytes of PDF output", bytes.len());
                Ok(bytes)
            }
            Err(e) => Err(CompileError::Failed {
                log: format!("compiler exited cleanly but produced no {OUTPUT_FILENAME}: {e}\n{log}"),
            }),
        }
    }
}

/// Reads at most `cap` bytes into `buf`, then drains the rest so the
/// child never blocks on a full pipe.
async fn read_capped<R>(pipe: Option<&mut R>, cap: u64, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else { return Ok(()) };
    {
        let mut limited = (&mut *pipe).take(cap);
        limited.read_to_end(buf).await?;
    }
    tokio::io::copy(pipe, &mut tokio::io::sink()).await?;
    Ok(())
}

fn combine_log(stdout: &[u8], stderr: &[u8], max_bytes: usize) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stderr = String::from_utf8_lossy(stderr);
    let mut log = if stderr.trim().is_empty() {
        stdout.into_owned()
    } else {
        format!("{stdout}\nSTDERR:\n{stderr}")
    };
    truncate_on_char_boundary(&mut log, max_bytes);
    log
}

fn truncate_on_char_boundary(s: &mut String, max_bytes: usize) {
    if s.len() <= max_bytes {
        return;
    }
    let mut cut = max_bytes;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
