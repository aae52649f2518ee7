//! Scripted consultation scenarios. Drives the full state machine with
//! deterministic engines against a temp state directory (no subprocesses).
//!
//! Covers: counter ↔ valves ↔ engine invoker ↔ verdict routing ↔ ack rounds
//! across repeated invocations of one session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use consultation::{
    AckPhase, AttemptError, Consultation, ConsultationConfig, CounterRecord, EngineInvoker,
    Evaluation, Fingerprint, ReviewEngine, ReviewInputs, RoundInfo, Stage, StateDir, Submission,
    Verdict, PLAN_SUBMISSION_TOOL,
};

const SESSION: &str = "scenario-session";

/// Engine replaying a script of responses; the last entry repeats.
struct ScriptedEngine {
    script: Mutex<VecDeque<Result<String, AttemptError>>>,
    calls: Arc<AtomicU32>,
    available: bool,
}

impl ScriptedEngine {
    fn new(script: Vec<Result<String, AttemptError>>) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let engine = Self {
            script: Mutex::new(script.into()),
            calls: Arc::clone(&calls),
            available: true,
        };
        (engine, calls)
    }

    fn verdicts(verdicts: &[&str]) -> (Self, Arc<AtomicU32>) {
        Self::new(
            verdicts
                .iter()
                .map(|v| Ok(format!("Review notes.\n<verdict>{v}</verdict>")))
                .collect(),
        )
    }
}

#[async_trait::async_trait]
impl ReviewEngine for ScriptedEngine {
    fn id(&self) -> &str {
        "scripted"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn run(&self, _prompt: &str) -> Result<String, AttemptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            match script.front().unwrap() {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(AttemptError::EmptyOutput {
                    engine: "scripted".into(),
                }),
            }
        }
    }
}

/// Plan inputs with a mutable primary plan and a recorded prompt history.
#[derive(Default)]
struct Inputs {
    plan: Mutex<Option<String>>,
    fallback: Option<String>,
    rounds: Mutex<Vec<RoundInfo>>,
}

impl Inputs {
    fn with_plan(plan: &str) -> Self {
        Self {
            plan: Mutex::new(Some(plan.to_string())),
            ..Default::default()
        }
    }

    fn set_plan(&self, plan: &str) {
        *self.plan.lock().unwrap() = Some(plan.to_string());
    }
}

impl ReviewInputs for Inputs {
    fn primary_plan(&self) -> Option<String> {
        self.plan.lock().unwrap().clone()
    }

    fn fallback_plan(&self) -> Option<String> {
        self.fallback.clone()
    }

    fn review_prompt(&self, plan: &str, round: &RoundInfo) -> String {
        self.rounds.lock().unwrap().push(*round);
        format!("Review this plan:\n{plan}")
    }
}

fn consultation(dir: &tempfile::TempDir, engine: ScriptedEngine) -> Consultation {
    Consultation::new(
        ConsultationConfig::default(),
        StateDir::new(dir.path()),
        EngineInvoker::new(Box::new(engine), Duration::ZERO),
    )
}

fn submission() -> Submission {
    Submission::new(PLAN_SUBMISSION_TOOL, SESSION)
}

fn reason(eval: &Evaluation) -> &str {
    &eval.decision().expect("decision emitted").reason
}

fn is_allow(eval: &Evaluation) -> bool {
    eval.decision().expect("decision emitted").is_allow()
}

// ── Non-critical rounds escalate to a human ───────────────────────

#[tokio::test]
async fn test_concerns_rounds_escalate_after_limit() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["CONCERNS"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan v1");

    for round in 1..=3 {
        let eval = c.evaluate(&submission(), &inputs).await;
        assert!(!is_allow(&eval), "round {round} should deny");
        assert_eq!(eval.stage(), Stage::VerdictRoute);
        let record = c.counter().load(SESSION);
        assert_eq!(record, CounterRecord::new(round, round));
    }

    let eval = c.evaluate(&submission(), &inputs).await;
    assert!(is_allow(&eval));
    assert_eq!(eval.stage(), Stage::NoncriticalValve);
    assert!(reason(&eval).contains("escalated"));
    assert!(!c.counter().exists(SESSION));
    assert_eq!(calls.load(Ordering::SeqCst), 3, "valve must not call the engine");
}

// ── REJECT resets attempt, keeps counting total ────────────────────

#[tokio::test]
async fn test_reject_reject_concerns_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = ScriptedEngine::verdicts(&["REJECT", "REJECT", "CONCERNS"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan");

    let eval = c.evaluate(&submission(), &inputs).await;
    assert!(reason(&eval).contains("REJECT"));
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(0, 1));

    c.evaluate(&submission(), &inputs).await;
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(0, 2));

    let eval = c.evaluate(&submission(), &inputs).await;
    assert!(!is_allow(&eval));
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(1, 3));
}

#[tokio::test]
async fn test_reject_after_concerns_resets_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = ScriptedEngine::verdicts(&["CONCERNS", "CONCERNS", "REJECT"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan");

    for _ in 0..3 {
        c.evaluate(&submission(), &inputs).await;
        let record = c.counter().load(SESSION);
        assert!(record.attempt <= record.total);
    }
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(0, 3));
}

// ── Approval handshake ─────────────────────────────────────────────

#[tokio::test]
async fn test_approve_then_ack_round_allows() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["CONCERNS", "APPROVE"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan v1");

    c.evaluate(&submission(), &inputs).await;
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(1, 1));

    inputs.set_plan("plan v2");
    let eval = c.evaluate(&submission(), &inputs).await;
    assert!(!is_allow(&eval));
    assert!(reason(&eval).contains("APPROVED"));
    assert!(reason(&eval).contains("<verdict>APPROVE</verdict>"));
    match &eval {
        Evaluation::Decided { verdict, .. } => assert_eq!(*verdict, Some(Verdict::Approve)),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        c.acks().phase(SESSION),
        AckPhase::PendingAck {
            fingerprint: Fingerprint::of("plan v2")
        }
    );
    // APPROVE leaves the counters alone until the ack round.
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(1, 1));

    let eval = c.evaluate(&submission(), &inputs).await;
    assert!(is_allow(&eval));
    assert_eq!(eval.stage(), Stage::AckCheck);
    assert!(reason(&eval).contains("already passed (confirmed)"));
    assert_eq!(c.acks().phase(SESSION), AckPhase::Resolved);
    assert!(!c.counter().exists(SESSION));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "ack round must not call the engine");
}

#[tokio::test]
async fn test_stale_marker_triggers_full_rereview() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["APPROVE", "CONCERNS"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan A");

    c.evaluate(&submission(), &inputs).await;
    assert!(matches!(c.acks().phase(SESSION), AckPhase::PendingAck { .. }));

    inputs.set_plan("plan B");
    let eval = c.evaluate(&submission(), &inputs).await;
    assert_eq!(eval.stage(), Stage::VerdictRoute);
    assert!(!is_allow(&eval));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(c.acks().phase(SESSION), AckPhase::Resolved);
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(1, 1));
}

#[tokio::test]
async fn test_legacy_empty_marker_allows_any_plan() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(format!("{SESSION}.approved")), "").unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["REJECT"]);
    let c = consultation(&dir, engine);
    c.counter().save(SESSION, CounterRecord::new(1, 2)).unwrap();

    let eval = c.evaluate(&submission(), &Inputs::with_plan("anything")).await;
    assert!(is_allow(&eval));
    assert_eq!(eval.stage(), Stage::AckCheck);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(c.acks().phase(SESSION), AckPhase::Resolved);
    assert!(!c.counter().exists(SESSION));
}

#[tokio::test]
async fn test_unreadable_marker_is_reviewed_not_allowed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join(format!("{SESSION}.approved"))).unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["REJECT"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan");

    for round in 1..=2 {
        let eval = c.evaluate(&submission(), &inputs).await;
        assert!(!is_allow(&eval));
        assert_eq!(eval.stage(), Stage::VerdictRoute);
        assert_eq!(calls.load(Ordering::SeqCst), round);
    }
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(0, 2));
}

#[tokio::test]
async fn test_ack_round_precedes_global_valve() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = ScriptedEngine::verdicts(&["APPROVE"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan");

    c.counter().save(SESSION, CounterRecord::new(2, 19)).unwrap();
    c.evaluate(&submission(), &inputs).await;
    c.counter().save(SESSION, CounterRecord::new(2, 25)).unwrap();

    let eval = c.evaluate(&submission(), &inputs).await;
    assert!(is_allow(&eval));
    assert_eq!(eval.stage(), Stage::AckCheck);
}

// ── Global valve tombstone ─────────────────────────────────────────

#[tokio::test]
async fn test_global_limit_hard_stop_keeps_tombstone() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["APPROVE"]);
    let c = consultation(&dir, engine);
    c.counter().save(SESSION, CounterRecord::new(0, 20)).unwrap();
    let inputs = Inputs::with_plan("plan");

    for _ in 0..3 {
        let eval = c.evaluate(&submission(), &inputs).await;
        assert!(!is_allow(&eval));
        assert_eq!(eval.stage(), Stage::GlobalValve);
        assert!(reason(&eval).contains("HARD STOP"));
        assert!(c.counter().exists(SESSION));
        assert_eq!(c.counter().load(SESSION), CounterRecord::new(0, 20));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_global_valve_checked_before_noncritical() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = ScriptedEngine::verdicts(&["CONCERNS"]);
    let c = consultation(&dir, engine);
    c.counter().save(SESSION, CounterRecord::new(5, 20)).unwrap();

    let eval = c.evaluate(&submission(), &Inputs::with_plan("plan")).await;
    assert_eq!(eval.stage(), Stage::GlobalValve);
    assert!(c.counter().exists(SESSION));
}

#[tokio::test]
async fn test_reject_loop_hits_global_limit() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["REJECT"]);
    let c = Consultation::new(
        ConsultationConfig {
            global_limit: 4,
            ..Default::default()
        },
        StateDir::new(dir.path()),
        EngineInvoker::new(Box::new(engine), Duration::ZERO),
    );
    let inputs = Inputs::with_plan("plan");

    for _ in 0..4 {
        let eval = c.evaluate(&submission(), &inputs).await;
        assert_eq!(eval.stage(), Stage::VerdictRoute);
    }
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(0, 4));

    let eval = c.evaluate(&submission(), &inputs).await;
    assert_eq!(eval.stage(), Stage::GlobalValve);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

// ── Engine failure fails open without touching counters ───────────

#[tokio::test]
async fn test_engine_failure_leaves_counter_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::new(vec![
        Err(AttemptError::NonZeroExit {
            engine: "scripted".into(),
            code: 1,
            stderr: "boom".into(),
        }),
        Err(AttemptError::EmptyOutput {
            engine: "scripted".into(),
        }),
    ]);
    let c = consultation(&dir, engine);
    c.counter().save(SESSION, CounterRecord::new(1, 4)).unwrap();

    let eval = c.evaluate(&submission(), &Inputs::with_plan("plan")).await;
    assert!(is_allow(&eval));
    assert_eq!(eval.stage(), Stage::EngineCall);
    assert!(reason(&eval).starts_with("WARNING"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(1, 4));
}

#[tokio::test]
async fn test_engine_not_found_skips_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let (mut engine, calls) = ScriptedEngine::verdicts(&["REJECT"]);
    engine.available = false;
    let c = consultation(&dir, engine);

    let eval = c.evaluate(&submission(), &Inputs::with_plan("plan")).await;
    assert!(is_allow(&eval));
    assert!(reason(&eval).contains("not found"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!c.counter().exists(SESSION));
}

#[tokio::test]
async fn test_retry_recovers_second_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::new(vec![
        Err(AttemptError::EmptyOutput {
            engine: "scripted".into(),
        }),
        Ok("<verdict>REJECT</verdict>".to_string()),
    ]);
    let c = consultation(&dir, engine);

    let eval = c.evaluate(&submission(), &Inputs::with_plan("plan")).await;
    assert!(!is_allow(&eval));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(c.counter().load(SESSION), CounterRecord::new(0, 1));
}

// ── Plan resolution ────────────────────────────────────────────────

#[tokio::test]
async fn test_fallback_plan_is_reviewed() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["CONCERNS"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs {
        fallback: Some("plan from file".to_string()),
        ..Default::default()
    };

    let eval = c.evaluate(&submission(), &inputs).await;
    assert_eq!(eval.stage(), Stage::VerdictRoute);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_no_plan_anywhere_allows() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["REJECT"]);
    let c = consultation(&dir, engine);

    let eval = c.evaluate(&submission(), &Inputs::default()).await;
    assert!(is_allow(&eval));
    assert_eq!(eval.stage(), Stage::PlanExtract);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_prompt_sees_counter_before_round() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = ScriptedEngine::verdicts(&["CONCERNS"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan");

    c.evaluate(&submission(), &inputs).await;
    c.evaluate(&submission(), &inputs).await;

    let rounds = inputs.rounds.lock().unwrap();
    assert_eq!(rounds.len(), 2);
    assert_eq!(rounds[0].counter, CounterRecord::new(0, 0));
    assert_eq!(rounds[1].counter, CounterRecord::new(1, 1));
    assert_eq!(rounds[1].noncritical_limit, 3);
}

// ── Sessions are isolated ──────────────────────────────────────────

#[tokio::test]
async fn test_sessions_do_not_share_counters() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, _) = ScriptedEngine::verdicts(&["CONCERNS"]);
    let c = consultation(&dir, engine);
    let inputs = Inputs::with_plan("plan");

    c.evaluate(&Submission::new(PLAN_SUBMISSION_TOOL, "a"), &inputs)
        .await;
    c.evaluate(&Submission::new(PLAN_SUBMISSION_TOOL, "a"), &inputs)
        .await;
    c.evaluate(&Submission::new(PLAN_SUBMISSION_TOOL, "b"), &inputs)
        .await;

    assert_eq!(c.counter().load("a"), CounterRecord::new(2, 2));
    assert_eq!(c.counter().load("b"), CounterRecord::new(1, 1));
}

#[tokio::test]
async fn test_lookalike_session_ids_do_not_share_tombstone() {
    let dir = tempfile::tempdir().unwrap();
    let (engine, calls) = ScriptedEngine::verdicts(&["REJECT"]);
    let c = Consultation::new(
        ConsultationConfig {
            global_limit: 2,
            ..Default::default()
        },
        StateDir::new(dir.path()),
        EngineInvoker::new(Box::new(engine), Duration::ZERO),
    );
    let inputs = Inputs::with_plan("plan");

    for sid in ["team.a", "team:a"] {
        c.evaluate(&Submission::new(PLAN_SUBMISSION_TOOL, sid), &inputs)
            .await;
    }
    assert_eq!(c.counter().load("team.a"), CounterRecord::new(0, 1));
    assert_eq!(c.counter().load("team:a"), CounterRecord::new(0, 1));

    let eval = c
        .evaluate(&Submission::new(PLAN_SUBMISSION_TOOL, "team_a"), &inputs)
        .await;
    assert_eq!(eval.stage(), Stage::VerdictRoute);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(c.counter().load("team_a"), CounterRecord::new(0, 1));
}
