//! Consultation state machine, one evaluation per hook invocation.
//!
//! ```text
//! Guard ─(pass-through)─▶ ∅
//!   │
//!   ▼
//! AckCheck ─(marker confirmed)─────────────▶ allow, clear marker + counter
//!   │  (no marker, or stale marker discarded)
//!   ▼
//! GlobalValve ─(total >= global)───────────▶ deny, counter kept (tombstone)
//!   ▼
//! NoncriticalValve ─(attempt >= limit)─────▶ allow, counter cleared
//!   ▼
//! PlanExtract ─(no plan)───────────────────▶ allow, counter untouched
//!   ▼
//! EngineCall ─(not found / exhausted)──────▶ allow, counter untouched
//!   ▼
//! VerdictRoute ─ APPROVE  ─▶ deny (surface approval), arm marker
//!              ─ CONCERNS ─▶ deny, attempt+1 total+1
//!              ─ REJECT   ─▶ deny, attempt=0 total+1
//! ```
//!
//! Each stage short-circuits. Nothing past `Guard` is silent: every such
//! path emits exactly one decision.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ack::{AckCheck, AckPhase, AckRounds};
use crate::counter::{CounterRecord, SessionCounter};
use crate::decision::Decision;
use crate::engine::EngineInvoker;
use crate::error::{EngineFailure, StoreResult};
use crate::fingerprint::Fingerprint;
use crate::store::StateDir;
use crate::verdict::{self, Verdict};

/// Tool whose invocation is the plan-submission event.
pub const PLAN_SUBMISSION_TOOL: &str = "ExitPlanMode";

/// Stages of one evaluation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Guard,
    AckCheck,
    GlobalValve,
    NoncriticalValve,
    PlanExtract,
    EngineCall,
    VerdictRoute,
    Emit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guard => write!(f, "guard"),
            Self::AckCheck => write!(f, "ack_check"),
            Self::GlobalValve => write!(f, "global_valve"),
            Self::NoncriticalValve => write!(f, "noncritical_valve"),
            Self::PlanExtract => write!(f, "plan_extract"),
            Self::EngineCall => write!(f, "engine_call"),
            Self::VerdictRoute => write!(f, "verdict_route"),
            Self::Emit => write!(f, "emit"),
        }
    }
}

/// Why the guard let an invocation pass through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardExit {
    /// Review globally disabled.
    Disabled,
    /// Invocation spawned by our own engine call.
    Nested,
    /// Not a plan submission.
    OtherTool,
    /// No session identifier.
    NoSession,
}

impl std::fmt::Display for GuardExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Nested => write!(f, "nested"),
            Self::OtherTool => write!(f, "other_tool"),
            Self::NoSession => write!(f, "no_session"),
        }
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// No output; the host proceeds as if the hook did not exist.
    PassThrough(GuardExit),
    /// Exactly one decision, produced at `stage`.
    Decided {
        stage: Stage,
        decision: Decision,
        verdict: Option<Verdict>,
    },
}

impl Evaluation {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Self::PassThrough(_) => None,
            Self::Decided { decision, .. } => Some(decision),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::PassThrough(_) => Stage::Guard,
            Self::Decided { stage, .. } => *stage,
        }
    }
}

/// Round limits and guard switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationConfig {
    /// Bound on `attempt` (CONCERNS rounds). Reaching it escalates to a human.
    pub noncritical_limit: u32,
    /// Bound on `total` (all non-approving rounds). Reaching it hard-stops.
    pub global_limit: u32,
    /// Review globally disabled.
    pub disabled: bool,
    /// This process was spawned by a review engine.
    pub nested: bool,
}

impl Default for ConsultationConfig {
    fn default() -> Self {
        Self {
            noncritical_limit: 3,
            global_limit: 20,
            disabled: false,
            nested: false,
        }
    }
}

/// The triggering event, reduced to what the guard needs.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub tool_name: String,
    pub session_id: String,
}

impl Submission {
    pub fn new(tool_name: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            session_id: session_id.into(),
        }
    }
}

/// Counter state as read at the start of a review round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundInfo {
    pub counter: CounterRecord,
    pub noncritical_limit: u32,
    pub global_limit: u32,
}

/// Plan text and prompt assembly supplied by the host integration.
pub trait ReviewInputs {
    /// Plan text carried by the event itself.
    fn primary_plan(&self) -> Option<String>;

    /// Plan text from the fallback store (most recently modified plan file).
    fn fallback_plan(&self) -> Option<String>;

    /// Full prompt for the review engine.
    fn review_prompt(&self, plan: &str, round: &RoundInfo) -> String;
}

/// Drives one evaluation against persisted session state.
pub struct Consultation {
    config: ConsultationConfig,
    counter: SessionCounter,
    acks: AckRounds,
    invoker: EngineInvoker,
}

impl Consultation {
    pub fn new(config: ConsultationConfig, state: StateDir, invoker: EngineInvoker) -> Self {
        Self {
            config,
            counter: SessionCounter::new(state.clone()),
            acks: AckRounds::new(state),
            invoker,
        }
    }

    pub fn counter(&self) -> &SessionCounter {
        &self.counter
    }

    pub fn acks(&self) -> &AckRounds {
        &self.acks
    }

    /// Evaluate one invocation.
    pub async fn evaluate(&self, submission: &Submission, inputs: &dyn ReviewInputs) -> Evaluation {
        if let Some(exit) = self.guard(submission) {
            debug!(reason = %exit, tool = %submission.tool_name, "pass-through");
            return Evaluation::PassThrough(exit);
        }

        let sid = submission.session_id.as_str();
        let (stage, decision, verdict) = self.decide(sid, inputs).await;
        info!(
            session = sid,
            %stage,
            decision = %decision.permission,
            verdict = ?verdict,
            "plan review decided"
        );
        Evaluation::Decided {
            stage,
            decision,
            verdict,
        }
    }

    fn guard(&self, submission: &Submission) -> Option<GuardExit> {
        if self.config.disabled {
            Some(GuardExit::Disabled)
        } else if self.config.nested {
            Some(GuardExit::Nested)
        } else if submission.tool_name != PLAN_SUBMISSION_TOOL {
            Some(GuardExit::OtherTool)
        } else if submission.session_id.is_empty() {
            Some(GuardExit::NoSession)
        } else {
            None
        }
    }

    async fn decide(
        &self,
        sid: &str,
        inputs: &dyn ReviewInputs,
    ) -> (Stage, Decision, Option<Verdict>) {
        // Resolved at most once; ack check only needs it when a marker exists.
        let mut plan: Option<Option<String>> = None;

        if let AckPhase::PendingAck { .. } = self.acks.phase(sid) {
            let text = plan.get_or_insert_with(|| resolve_plan(inputs));
            let current = Fingerprint::of(text.as_deref().unwrap_or_default());
            match self.acks.check(sid, &current) {
                AckCheck::Confirmed { legacy } => {
                    self.log_store(self.acks.resolve(sid), "resolve approval marker");
                    self.log_store(self.counter.clear(sid), "clear counter");
                    let reason = if legacy {
                        messages::ack_legacy()
                    } else {
                        messages::ack_confirmed()
                    };
                    return (Stage::AckCheck, Decision::allow(reason), None);
                }
                AckCheck::Stale { approved } => {
                    info!(
                        session = sid,
                        approved = approved.short(),
                        current = current.short(),
                        "plan changed since approval, re-reviewing"
                    );
                    self.log_store(self.acks.resolve(sid), "discard stale approval marker");
                }
                AckCheck::NoPending => {}
            }
        }

        let record = self.counter.load(sid);
        let limits = &self.config;

        if record.total >= limits.global_limit {
            warn!(session = sid, %record, limit = limits.global_limit, "global round limit reached");
            let path = self.counter.path(sid);
            return (
                Stage::GlobalValve,
                Decision::deny(messages::hard_stop(record.total, limits.global_limit, &path)),
                None,
            );
        }

        if record.attempt >= limits.noncritical_limit {
            warn!(session = sid, %record, limit = limits.noncritical_limit, "non-critical round limit reached");
            self.log_store(self.counter.clear(sid), "clear counter");
            return (
                Stage::NoncriticalValve,
                Decision::allow(messages::escalated(record.attempt, limits.noncritical_limit)),
                None,
            );
        }

        let Some(plan) = plan.unwrap_or_else(|| resolve_plan(inputs)) else {
            return (
                Stage::PlanExtract,
                Decision::allow(messages::nothing_to_review()),
                None,
            );
        };

        let round = RoundInfo {
            counter: record,
            noncritical_limit: limits.noncritical_limit,
            global_limit: limits.global_limit,
        };
        let prompt = inputs.review_prompt(&plan, &round);
        let engine = self.invoker.engine_id().to_string();

        let response = match self.invoker.invoke(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                return (
                    Stage::EngineCall,
                    Decision::allow(messages::engine_empty(&engine)),
                    None,
                )
            }
            Err(failure) => {
                warn!(
                    session = sid,
                    transient = failure.is_transient(),
                    error = %failure,
                    "review unavailable, failing open"
                );
                return (
                    Stage::EngineCall,
                    Decision::allow(messages::engine_failed(&failure)),
                    None,
                )
            }
        };

        let verdict = verdict::extract(&response);
        let decision = match verdict {
            Verdict::Approve => {
                self.log_store(
                    self.acks.arm(sid, &Fingerprint::of(&plan)),
                    "arm approval marker",
                );
                Decision::deny(messages::approved(&engine, &response))
            }
            Verdict::Concerns => {
                let next = record.after_concerns();
                self.log_store(self.counter.save(sid, next), "save counter");
                Decision::deny(messages::concerns(
                    &engine,
                    next.attempt,
                    limits.noncritical_limit,
                    &response,
                ))
            }
            Verdict::Reject => {
                let next = record.after_reject();
                self.log_store(self.counter.save(sid, next), "save counter");
                Decision::deny(messages::rejected(
                    &engine,
                    next.total,
                    limits.global_limit,
                    &response,
                ))
            }
        };
        (Stage::VerdictRoute, decision, Some(verdict))
    }

    /// State writes are best effort: a failed write is logged and the
    /// decision still goes out.
    fn log_store(&self, result: StoreResult<()>, what: &str) {
        if let Err(e) = result {
            warn!(error = %e, "failed to {what}");
        }
    }
}

fn resolve_plan(inputs: &dyn ReviewInputs) -> Option<String> {
    let non_blank = |s: &String| !s.trim().is_empty();
    inputs
        .primary_plan()
        .filter(non_blank)
        .or_else(|| inputs.fallback_plan().filter(non_blank))
}

/// Decision texts shown to the calling agent.
pub mod messages {
    use std::path::Path;

    use super::EngineFailure;

    pub fn ack_legacy() -> String {
        "Plan review already passed. Proceeding.".to_string()
    }

    pub fn ack_confirmed() -> String {
        "Plan review already passed (confirmed): this is the approved plan. Proceeding."
            .to_string()
    }

    pub fn hard_stop(total: u32, limit: u32, counter: &Path) -> String {
        format!(
            "PLAN REVIEW HARD STOP: {total} review rounds reached the global limit of {limit}. \
             Stop resubmitting and ask the user how to proceed. Automatic review stays blocked \
             for this session until {} is removed.",
            counter.display()
        )
    }

    pub fn escalated(attempt: u32, limit: u32) -> String {
        format!(
            "Plan review escalated to human: {attempt} non-critical review rounds reached the \
             limit of {limit}. Proceeding; the user should review the outstanding concerns."
        )
    }

    pub fn nothing_to_review() -> String {
        "Plan review skipped: nothing to review (no plan text found).".to_string()
    }

    pub fn engine_empty(engine: &str) -> String {
        format!("WARNING: plan review unavailable ({engine} returned no output). Proceeding without review.")
    }

    pub fn engine_failed(failure: &EngineFailure) -> String {
        format!("WARNING: plan review unavailable ({failure}). Proceeding without review.")
    }

    pub fn approved(engine: &str, response: &str) -> String {
        format!(
            "Plan review APPROVED by {engine}. Show this review to the user, then submit the \
             same plan again (ExitPlanMode) to proceed.\n\n{}",
            response.trim()
        )
    }

    pub fn concerns(engine: &str, attempt: u32, limit: u32, response: &str) -> String {
        let remaining = limit.saturating_sub(attempt);
        format!(
            "Plan review by {engine}: CONCERNS (round {attempt}/{limit}, {remaining} remaining \
             before escalation to the user). Revise the plan to address them and resubmit.\n\n{}",
            response.trim()
        )
    }

    pub fn rejected(engine: &str, total: u32, global_limit: u32, response: &str) -> String {
        format!(
            "Plan review by {engine}: REJECT. Critical issues must be resolved first; revise the \
             plan and resubmit (review round {total} of at most {global_limit}).\n\n{}",
            response.trim()
        )
    }
}
