//! Wires the hook's collaborators into the consultation state machine.

use std::path::{Path, PathBuf};

use consultation::{
    Consultation, Decision, DryRunEngine, EngineInvoker, ReviewEngine, ReviewInputs, RoundInfo,
    StateDir, SubprocessEngine, Submission,
};
use tracing::{debug, info, warn};

use crate::config::HookConfig;
use crate::input::HookInput;
use crate::plan_source;
use crate::prompt::{PromptBuilder, PROMPT_VERSION};
use crate::transcript::{self, MAX_TURN_CHARS, RECENT_TURNS};

/// Plan and prompt collaborators for one invocation.
pub struct HookInputs<'a> {
    input: &'a HookInput,
    plans_dir: &'a Path,
}

impl<'a> HookInputs<'a> {
    pub fn new(input: &'a HookInput, plans_dir: &'a Path) -> Self {
        Self { input, plans_dir }
    }
}

impl ReviewInputs for HookInputs<'_> {
    fn primary_plan(&self) -> Option<String> {
        self.input.plan().map(String::from)
    }

    fn fallback_plan(&self) -> Option<String> {
        plan_source::fallback_plan(self.plans_dir)
    }

    fn review_prompt(&self, plan: &str, round: &RoundInfo) -> String {
        let turns = self
            .input
            .transcript_path
            .as_deref()
            .map(|path| transcript::recent_user_turns(path, RECENT_TURNS, MAX_TURN_CHARS))
            .unwrap_or_default();
        debug!(
            turns = turns.len(),
            prompt_version = PROMPT_VERSION,
            "building review prompt"
        );
        PromptBuilder::new(turns, self.input.cwd.clone()).build(plan, round)
    }
}

/// The configured review engine.
pub fn build_engine(config: &HookConfig, cwd: Option<PathBuf>) -> Box<dyn ReviewEngine> {
    if config.dry_run {
        return Box::new(DryRunEngine);
    }
    let ctx = config.execution_context(cwd);
    match SubprocessEngine::with_extra_args(config.engine, &config.engine_args, ctx.clone()) {
        Some(engine) => Box::new(engine),
        None => {
            warn!(
                args = %config.engine_args,
                "PLAN_REVIEW_ENGINE_ARGS has unbalanced quoting, ignoring it"
            );
            Box::new(SubprocessEngine::new(config.engine, ctx))
        }
    }
}

pub fn build_consultation(config: &HookConfig, cwd: Option<PathBuf>) -> Consultation {
    let invoker = EngineInvoker::new(build_engine(config, cwd), config.retry_delay);
    Consultation::new(
        config.consultation_config(),
        StateDir::new(&config.state_dir),
        invoker,
    )
}

/// Evaluate one raw stdin payload. `None` means pass through silently.
pub async fn run(config: &HookConfig, raw: &str) -> Option<Decision> {
    let input = match HookInput::parse(raw) {
        Ok(input) => input,
        Err(e) => {
            if config.disabled || config.nested {
                debug!(error = %e, "undecodable input while inactive, passing through");
                return None;
            }
            warn!(error = %e, "hook input unusable");
            return Some(Decision::allow(format!(
                "WARNING: plan review unavailable (unusable environment: {e}). \
                 Proceeding without review."
            )));
        }
    };

    let consultation = build_consultation(config, input.working_dir());
    let submission = Submission::new(input.tool_name(), input.session_id());
    let inputs = HookInputs::new(&input, &config.plans_dir);

    let evaluation = consultation.evaluate(&submission, &inputs).await;
    info!(stage = %evaluation.stage(), "hook finished");
    evaluation.decision().cloned()
}
