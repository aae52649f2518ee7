//! Plan Review Consultation Library
//!
//! This library provides:
//! - A persistent per-session round counter (`attempt:total`)
//! - An external review-engine invoker with bounded retry and a dry-run mode
//! - Fail-closed verdict extraction from untrusted engine output
//! - The consultation state machine deciding allow/deny for a plan submission
//! - The two-phase approval handshake (ack round)
//!
//! # Usage
//!
//! ```ignore
//! let invoker = EngineInvoker::new(Box::new(DryRunEngine), Duration::from_secs(2));
//! let consultation = Consultation::new(
//!     ConsultationConfig::default(),
//!     StateDir::new("/tmp/plan-review"),
//!     invoker,
//! );
//! let evaluation = consultation
//!     .evaluate(&Submission::new("ExitPlanMode", "session-1"), &inputs)
//!     .await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod ack;
pub mod counter;
pub mod decision;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod machine;
pub mod store;
pub mod verdict;

// Re-export state types
pub use ack::{AckCheck, AckPhase, AckRounds};
pub use counter::{CounterRecord, RecordFormat, SessionCounter};
pub use fingerprint::Fingerprint;
pub use store::{session_file_stem, StateDir};

// Re-export engine types
pub use engine::{
    DryRunEngine, EngineInvoker, EngineKind, ExecutionContext, ReviewEngine, SubprocessEngine,
};
pub use error::{AttemptError, EngineFailure, StoreError, StoreResult};

// Re-export decision types
pub use decision::{Decision, HookOutput, Permission};
pub use machine::{
    Consultation, ConsultationConfig, Evaluation, GuardExit, ReviewInputs, RoundInfo, Stage,
    Submission, PLAN_SUBMISSION_TOOL,
};
pub use verdict::{Extraction, Verdict};
