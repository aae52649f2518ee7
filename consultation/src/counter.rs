//! Persistent session counter: consultation progress that survives across
//! hook invocations within one session.
//!
//! # On-disk format
//!
//! ```text
//! current:  "<attempt>:<total>"
//! legacy:   "<attempt>"            (total defaults to attempt)
//! ```
//!
//! Decoding is total: anything else decodes to `0:0`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreResult;
use crate::store::StateDir;

/// Layout a record was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordFormat {
    /// `attempt:total`.
    Current,
    /// A single integer written by older hook versions.
    Legacy,
    /// Missing, empty or unparseable.
    Reset,
}

impl std::fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Legacy => write!(f, "legacy"),
            Self::Reset => write!(f, "reset"),
        }
    }
}

/// Per-session round counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    /// Non-critical (CONCERNS) rounds since the last REJECT or session start.
    pub attempt: u32,
    /// Every non-approving round in the session's lifetime.
    pub total: u32,
}

impl CounterRecord {
    pub fn new(attempt: u32, total: u32) -> Self {
        Self { attempt, total }
    }

    /// Decode a persisted record. Never fails.
    pub fn decode(raw: &str) -> Self {
        Self::decode_with_format(raw).0
    }

    /// Decode a persisted record and report which layout it used.
    pub fn decode_with_format(raw: &str) -> (Self, RecordFormat) {
        let parts: Vec<&str> = raw.trim().split(':').collect();
        let parsed = match parts.as_slice() {
            [attempt, total] => match (attempt.trim().parse(), total.trim().parse()) {
                (Ok(a), Ok(t)) => Some((Self::new(a, t), RecordFormat::Current)),
                _ => None,
            },
            [legacy] => legacy
                .trim()
                .parse()
                .ok()
                .map(|a| (Self::new(a, a), RecordFormat::Legacy)),
            _ => None,
        };

        match parsed {
            // attempt never exceeds total; a hand-edited record is pulled back in line.
            Some((rec, fmt)) => (Self::new(rec.attempt, rec.total.max(rec.attempt)), fmt),
            None => (Self::default(), RecordFormat::Reset),
        }
    }

    /// Encode in the current layout.
    pub fn encode(&self) -> String {
        format!("{}:{}", self.attempt, self.total)
    }

    /// Transition for a CONCERNS verdict.
    pub fn after_concerns(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            total: self.total.saturating_add(1),
        }
    }

    /// Transition for a REJECT verdict: non-critical progress is discarded.
    pub fn after_reject(self) -> Self {
        Self {
            attempt: 0,
            total: self.total.saturating_add(1),
        }
    }
}

impl std::fmt::Display for CounterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "attempt={} total={}", self.attempt, self.total)
    }
}

/// File-backed counter store keyed by session id.
#[derive(Debug, Clone)]
pub struct SessionCounter {
    dir: StateDir,
}

impl SessionCounter {
    const KIND: &'static str = "count";

    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }

    /// Location of the session's record file.
    pub fn path(&self, session_id: &str) -> PathBuf {
        self.dir.file(session_id, Self::KIND)
    }

    /// Load a session's counters. Missing or corrupt records load as zero.
    pub fn load(&self, session_id: &str) -> CounterRecord {
        let path = self.path(session_id);
        match self.dir.read(&path) {
            Some(raw) => {
                let (record, format) = CounterRecord::decode_with_format(&raw);
                debug!(session = session_id, %record, %format, "counter loaded");
                record
            }
            None => CounterRecord::default(),
        }
    }

    pub fn save(&self, session_id: &str, record: CounterRecord) -> StoreResult<()> {
        let path = self.path(session_id);
        self.dir.write(&path, &record.encode())
    }

    pub fn clear(&self, session_id: &str) -> StoreResult<()> {
        let path = self.path(session_id);
        self.dir.remove(&path)
    }

    /// Whether a record file exists for the session.
    pub fn exists(&self, session_id: &str) -> bool {
        self.path(session_id).exists()
    }
}
