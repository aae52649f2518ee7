use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use consultation::Decision;
use plan_review_hook::logging::{self, LogTarget};
use plan_review_hook::{hook, HookConfig, HookError};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// PreToolUse hook that sends submitted plans to an external reviewer.
#[derive(Parser, Debug, Default)]
#[command(name = "plan-review-hook", version, about)]
struct Args {
    /// Directory for session counters and approval markers.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Log file (defaults to plan-review.log in the state directory).
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Synthesize an APPROVE instead of calling the engine.
    #[arg(long)]
    dry_run: bool,
}

// The hook must never block the host: every path exits 0.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let (args, arg_error) = match Args::try_parse() {
        Ok(args) => (args, None),
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => (Args::default(), Some(e.to_string())),
    };

    let mut config = HookConfig::from_env();
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }
    if let Some(file) = args.log_file {
        config.log_file = Some(file);
    }
    config.dry_run |= args.dry_run;

    if let LogTarget::Stderr { reason } = logging::init(&config.log_path()) {
        warn!(path = %config.log_path().display(), %reason, "log file unavailable, logging to stderr");
    }
    if let Some(e) = arg_error {
        warn!(error = %e.trim(), "ignoring unusable command line");
    }
    for warning in &config.warnings {
        warn!("{warning}");
    }
    info!(
        engine = %config.engine,
        dry_run = config.dry_run,
        state_dir = %config.state_dir.display(),
        "plan review hook invoked"
    );

    let raw = match read_stdin().await {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "stdin unreadable");
            String::new()
        }
    };

    if let Some(decision) = hook::run(&config, &raw).await {
        if let Err(e) = emit(&decision) {
            warn!(error = %e, "failed to write decision");
        }
    }
}

async fn read_stdin() -> Result<String, HookError> {
    let mut raw = String::new();
    tokio::io::stdin().read_to_string(&mut raw).await?;
    Ok(raw)
}

fn emit(decision: &Decision) -> Result<()> {
    let json = decision.to_json().context("Failed to serialize decision")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("Failed to write stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}
