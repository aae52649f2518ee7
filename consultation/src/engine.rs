//! Engine invoker. Runs the external review engine with a bounded retry.
//!
//! ```text
//! invoke(prompt)
//!   ├─ engine not on PATH ──────────────▶ NotFound   (no attempt, no delay)
//!   ├─ attempt 1 ok ────────────────────▶ text
//!   ├─ attempt 1 failed → sleep(delay)
//!   │     ├─ attempt 2 ok ──────────────▶ text
//!   │     └─ attempt 2 failed ──────────▶ Exhausted
//! ```
//!
//! A failed attempt is a non-zero exit, a clean exit with empty output, a
//! spawn error, or a timeout; all are retried identically.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{AttemptError, EngineFailure};

/// Environment variable set on every spawned engine so a hook triggered
/// from inside the review does not start another review.
pub const NESTED_ENV: &str = "PLAN_REVIEW_NESTED";

/// Response synthesized in dry-run mode.
pub const DRY_RUN_RESPONSE: &str =
    "Dry run: plan review skipped, no engine was invoked.\n\n<verdict>APPROVE</verdict>";

/// Attempts per invocation: one initial, one retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Supported review engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Codex,
    Gemini,
}

impl EngineKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codex" => Some(Self::Codex),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Executable name looked up on `PATH`.
    pub fn program(self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    /// Full argument vector for a non-interactive run reading the prompt
    /// from stdin, with `extra` spliced in after any subcommand.
    pub fn argv(self, extra: &[String]) -> Vec<String> {
        let (head, tail): (&[&str], &[&str]) = match self {
            Self::Codex => (&["exec", "--skip-git-repo-check"], &["-"]),
            // gemini runs non-interactively whenever stdin is not a terminal.
            Self::Gemini => (&[], &[]),
        };
        head.iter()
            .map(|s| s.to_string())
            .chain(extra.iter().cloned())
            .chain(tail.iter().map(|s| s.to_string()))
            .collect()
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

/// Execution context handed to a spawned engine.
///
/// The recursion guard travels here as an explicit field and is applied to
/// the child's environment only; the hook's own environment is never touched.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Mark the child as a nested review so its hooks pass through.
    pub nested: bool,
    /// Working directory for the child.
    pub cwd: Option<PathBuf>,
    /// Per-attempt time budget.
    pub timeout: Duration,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            nested: true,
            cwd: None,
            timeout: Duration::from_secs(600),
        }
    }
}

/// A review engine: one prompt in, raw text out.
#[async_trait]
pub trait ReviewEngine: Send + Sync {
    /// Identifier for logs and messages (e.g. `"codex"`).
    fn id(&self) -> &str;

    /// Pre-flight check. `false` is a permanent failure: no attempt is made.
    fn is_available(&self) -> bool {
        true
    }

    /// Run a single attempt.
    async fn run(&self, prompt: &str) -> Result<String, AttemptError>;
}

/// Engine backed by a CLI subprocess.
pub struct SubprocessEngine {
    id: String,
    program: String,
    args: Vec<String>,
    ctx: ExecutionContext,
}

impl SubprocessEngine {
    pub fn new(kind: EngineKind, ctx: ExecutionContext) -> Self {
        Self::custom(kind.program(), kind.program(), kind.argv(&[]), ctx)
    }

    /// Build an engine for a supported kind with extra CLI arguments given
    /// as one shell-quoted string.
    ///
    /// Returns `None` when the string has unbalanced quotes.
    pub fn with_extra_args(kind: EngineKind, extra: &str, ctx: ExecutionContext) -> Option<Self> {
        let extra = shlex::split(extra)?;
        Some(Self::custom(kind.program(), kind.program(), kind.argv(&extra), ctx))
    }

    /// Arbitrary command line; the prompt is still written to stdin.
    pub fn custom(
        id: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args,
            ctx,
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if self.ctx.nested {
            cmd.env(NESTED_ENV, "1");
        }
        if let Some(ref cwd) = self.ctx.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

#[async_trait]
impl ReviewEngine for SubprocessEngine {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_available(&self) -> bool {
        find_on_path(&self.program).is_some()
    }

    async fn run(&self, prompt: &str) -> Result<String, AttemptError> {
        let engine = self.id().to_string();
        let mut child = self.command().spawn().map_err(|source| AttemptError::Spawn {
            engine: engine.clone(),
            source,
        })?;

        // Feed stdin concurrently so a chatty child cannot deadlock on a full stdout pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_owned();
            let engine = engine.clone();
            tokio::spawn(async move {
                // A child that exits without reading stdin surfaces through its exit status.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(engine = %engine, error = %e, "engine closed stdin early");
                }
            });
        }

        let seconds = self.ctx.timeout.as_secs();
        let output = match tokio::time::timeout(self.ctx.timeout, child.wait_with_output()).await
        {
            Ok(Ok(out)) => out,
            Ok(Err(source)) => return Err(AttemptError::Spawn { engine, source }),
            Err(_) => return Err(AttemptError::Timeout { engine, seconds }),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AttemptError::NonZeroExit {
                engine,
                code: output.status.code().unwrap_or(-1),
                stderr: truncate(stderr.trim(), 500),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if stdout.trim().is_empty() {
            return Err(AttemptError::EmptyOutput { engine });
        }
        Ok(stdout)
    }
}

/// Engine that never spawns anything and always approves.
pub struct DryRunEngine;

#[async_trait]
impl ReviewEngine for DryRunEngine {
    fn id(&self) -> &str {
        "dry-run"
    }

    async fn run(&self, _prompt: &str) -> Result<String, AttemptError> {
        Ok(DRY_RUN_RESPONSE.to_string())
    }
}

/// Retry policy around a `ReviewEngine`.
pub struct EngineInvoker {
    engine: Box<dyn ReviewEngine>,
    retry_delay: Duration,
}

impl EngineInvoker {
    pub fn new(engine: Box<dyn ReviewEngine>, retry_delay: Duration) -> Self {
        Self {
            engine,
            retry_delay,
        }
    }

    pub fn engine_id(&self) -> &str {
        self.engine.id()
    }

    /// Invoke the engine: at most `MAX_ATTEMPTS` attempts, `retry_delay` apart.
    pub async fn invoke(&self, prompt: &str) -> Result<String, EngineFailure> {
        let engine = self.engine.id().to_string();

        if !self.engine.is_available() {
            warn!(engine = %engine, "review engine not found, skipping review");
            return Err(EngineFailure::NotFound { engine });
        }

        let mut attempt = 1;
        loop {
            match self.engine.run(prompt).await {
                Ok(text) => {
                    info!(engine = %engine, attempt, bytes = text.len(), "engine responded");
                    return Ok(text);
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    warn!(engine = %engine, attempt, error = %err, "engine attempt failed, retrying");
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    attempt += 1;
                }
                Err(last) => {
                    warn!(engine = %engine, attempt, error = %last, "engine attempts exhausted");
                    return Err(EngineFailure::Exhausted {
                        engine,
                        attempts: attempt,
                        last,
                    });
                }
            }
        }
    }
}

/// Locate an executable on `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let direct = std::path::Path::new(program);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
