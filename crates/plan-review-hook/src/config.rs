use std::path::PathBuf;
use std::time::Duration;

use consultation::engine::NESTED_ENV;
use consultation::{ConsultationConfig, EngineKind, ExecutionContext};

/// Hook configuration, resolved once at start-up.
///
/// Every key is optional. Legacy aliases are consulted only when the primary
/// key is unset.
#[derive(Debug, Clone)]
pub struct HookConfig {
    /// Review engine (`codex` or `gemini`).
    pub engine: EngineKind,
    /// Pass every invocation through untouched.
    pub disabled: bool,
    /// Synthesize an APPROVE instead of spawning an engine.
    pub dry_run: bool,
    /// CONCERNS rounds before escalating to a human.
    pub noncritical_limit: u32,
    /// Non-approving rounds before the hard stop.
    pub global_limit: u32,
    /// Delay between the first and second engine attempt.
    pub retry_delay: Duration,
    /// Per-attempt engine timeout.
    pub engine_timeout: Duration,
    /// Extra engine CLI arguments (shell words).
    pub engine_args: String,
    /// Counter and approval-marker directory.
    pub state_dir: PathBuf,
    /// Fallback plan store.
    pub plans_dir: PathBuf,
    /// Explicit log destination; defaults to a file in `state_dir`.
    pub log_file: Option<PathBuf>,
    /// Set when this process was spawned by a review engine.
    pub nested: bool,
    /// Problems found while resolving; logged once logging is up.
    pub warnings: Vec<String>,
}

impl HookConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = Lookup {
            get: &lookup,
            warnings: Vec::new(),
        };

        let engine = match env.value("PLAN_REVIEW_ENGINE", Some("PLAN_REVIEWER")) {
            Some(raw) => EngineKind::parse(&raw).unwrap_or_else(|| {
                env.warn(format!("unknown review engine {raw:?}, using codex"));
                EngineKind::Codex
            }),
            None => EngineKind::Codex,
        };

        let disabled = env.flag("PLAN_REVIEW_DISABLED", Some("PLAN_REVIEW_SKIP"));
        let dry_run = env.flag("PLAN_REVIEW_DRY_RUN", None);
        let nested = env.flag(NESTED_ENV, None);
        let noncritical_limit =
            env.number("PLAN_REVIEW_MAX_ROUNDS", Some("PLAN_REVIEW_MAX_ATTEMPTS"), 3);
        let global_limit = env.number(
            "PLAN_REVIEW_MAX_TOTAL_ROUNDS",
            Some("PLAN_REVIEW_GLOBAL_LIMIT"),
            20,
        );
        let retry_delay = Duration::from_secs(env.number("PLAN_REVIEW_RETRY_DELAY", None, 2));
        let engine_timeout =
            Duration::from_secs(env.number("PLAN_REVIEW_ENGINE_TIMEOUT", None, 600));
        let engine_args = env
            .value("PLAN_REVIEW_ENGINE_ARGS", None)
            .unwrap_or_default();

        let state_dir = env
            .value("PLAN_REVIEW_STATE_DIR", None)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                env.value("TMPDIR", None)
                    .map(PathBuf::from)
                    .unwrap_or_else(std::env::temp_dir)
                    .join("plan-review")
            });
        let plans_dir = env
            .value("PLAN_REVIEW_PLANS_DIR", None)
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                env.value("HOME", None)
                    .map(PathBuf::from)
                    .unwrap_or_default()
                    .join(".claude")
                    .join("plans")
            });
        let log_file = env.value("PLAN_REVIEW_LOG_FILE", None).map(PathBuf::from);

        Self {
            engine,
            disabled,
            dry_run,
            noncritical_limit,
            global_limit,
            retry_delay,
            engine_timeout,
            engine_args,
            state_dir,
            plans_dir,
            log_file,
            nested,
            warnings: env.warnings,
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_file
            .clone()
            .unwrap_or_else(|| self.state_dir.join("plan-review.log"))
    }

    pub fn consultation_config(&self) -> ConsultationConfig {
        ConsultationConfig {
            noncritical_limit: self.noncritical_limit,
            global_limit: self.global_limit,
            disabled: self.disabled,
            nested: self.nested,
        }
    }

    /// Context for a spawned engine; always marks the child as nested.
    pub fn execution_context(&self, cwd: Option<PathBuf>) -> ExecutionContext {
        ExecutionContext {
            nested: true,
            cwd,
            timeout: self.engine_timeout,
        }
    }
}

struct Lookup<'a, F> {
    get: &'a F,
    warnings: Vec<String>,
}

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Primary key if set and non-empty, else the alias.
    fn value(&self, key: &str, alias: Option<&str>) -> Option<String> {
        let non_empty = |v: String| (!v.trim().is_empty()).then_some(v);
        (self.get)(key)
            .and_then(non_empty)
            .or_else(|| alias.and_then(|a| (self.get)(a)).and_then(non_empty))
    }

    fn flag(&mut self, key: &str, alias: Option<&str>) -> bool {
        let Some(raw) = self.value(key, alias) else {
            return false;
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                self.warn(format!("{key}={raw:?} is not a boolean, treating as false"));
                false
            }
        }
    }

    fn number<T>(&mut self, key: &str, alias: Option<&str>, default: T) -> T
    where
        T: std::str::FromStr + std::fmt::Display + Copy,
    {
        let Some(raw) = self.value(key, alias) else {
            return default;
        };
        match raw.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                self.warn(format!(
                    "{key}={raw:?} is not a valid number, using default {default}"
                ));
                default
            }
        }
    }
}
