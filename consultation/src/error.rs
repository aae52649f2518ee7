//! Consultation error types
//!
//! Every failure the review core can observe is named here. None of them is
//! allowed to escape `Consultation::evaluate`; each one maps to a documented
//! allow or deny outcome.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single engine attempt.
#[derive(Error, Debug)]
pub enum AttemptError {
    /// The engine process could not be started.
    #[error("failed to spawn {engine}: {source}")]
    Spawn {
        engine: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine exited with a non-zero status.
    #[error("{engine} exited with status {code}: {stderr}")]
    NonZeroExit {
        engine: String,
        code: i32,
        stderr: String,
    },

    /// The engine exited cleanly but wrote nothing.
    #[error("{engine} returned empty output")]
    EmptyOutput { engine: String },

    /// The engine did not finish within its time budget.
    #[error("{engine} timed out after {seconds}s")]
    Timeout { engine: String, seconds: u64 },
}

/// Terminal outcome of an engine invocation that produced no usable text.
#[derive(Error, Debug)]
pub enum EngineFailure {
    /// The engine executable is not on the search path. Permanent; never retried.
    #[error("review engine '{engine}' not found on PATH")]
    NotFound { engine: String },

    /// Every attempt failed.
    #[error("review engine '{engine}' failed after {attempts} attempts: {last}")]
    Exhausted {
        engine: String,
        attempts: u32,
        #[source]
        last: AttemptError,
    },
}

impl EngineFailure {
    /// Whether a retry could ever have helped.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// State directory I/O failure.
///
/// Loads never produce this (corrupt or missing state decodes to zero);
/// only writes and deletes do.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;
