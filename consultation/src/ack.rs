//! Ack-round controller for the two-phase approval handshake.
//!
//! An APPROVE verdict is first surfaced to the calling agent as a deny that
//! carries the approval text. The agent resubmits; that resubmission is the
//! ack round and becomes the real allow.
//!
//! ```text
//! Resolved ──APPROVE──▶ PendingAck{fp}
//!    ▲                      │
//!    │   resubmit, fp match │  (or legacy marker with empty fp)
//!    └──────────────────────┘
//!
//! PendingAck{fp} ──resubmit, fp mismatch──▶ Resolved, then full re-review
//! ```
//!
//! The phase is persisted as a marker file holding the approved plan's
//! fingerprint. At most one marker exists per session.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreResult;
use crate::fingerprint::Fingerprint;
use crate::store::StateDir;

/// Handshake phase for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckPhase {
    /// The engine approved a plan; waiting for the agent to resubmit it.
    PendingAck { fingerprint: Fingerprint },
    /// No approval outstanding.
    Resolved,
}

impl std::fmt::Display for AckPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingAck { fingerprint } => write!(f, "pending_ack({})", fingerprint.short()),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// Result of matching a submission against the handshake state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckCheck {
    /// No approval outstanding; review normally.
    NoPending,
    /// The submission acknowledges an approval. `legacy` is set when the
    /// marker carried no fingerprint and was accepted unconditionally.
    Confirmed { legacy: bool },
    /// An approval is outstanding for different plan text.
    Stale { approved: Fingerprint },
}

/// Marker-file backed handshake state keyed by session id.
#[derive(Debug, Clone)]
pub struct AckRounds {
    dir: StateDir,
}

impl AckRounds {
    const KIND: &'static str = "approved";

    pub fn new(dir: StateDir) -> Self {
        Self { dir }
    }

    pub fn phase(&self, session_id: &str) -> AckPhase {
        let path = self.dir.file(session_id, Self::KIND);
        if !path.exists() {
            return AckPhase::Resolved;
        }
        // Only a readable, empty marker is a legacy approval. An unreadable
        // one carries no approval and the plan is reviewed again.
        match self.dir.read(&path) {
            Some(raw) => AckPhase::PendingAck {
                fingerprint: Fingerprint::from_stored(&raw),
            },
            None => {
                warn!(
                    session = session_id,
                    path = %path.display(),
                    "approval marker unreadable, ignoring it"
                );
                AckPhase::Resolved
            }
        }
    }

    /// Compare a submission against the outstanding approval, if any.
    pub fn check(&self, session_id: &str, current: &Fingerprint) -> AckCheck {
        match self.phase(session_id) {
            AckPhase::Resolved => AckCheck::NoPending,
            AckPhase::PendingAck { fingerprint } if fingerprint.is_empty() => {
                AckCheck::Confirmed { legacy: true }
            }
            AckPhase::PendingAck { fingerprint } if &fingerprint == current => {
                AckCheck::Confirmed { legacy: false }
            }
            AckPhase::PendingAck { fingerprint } => AckCheck::Stale {
                approved: fingerprint,
            },
        }
    }

    /// Enter `PendingAck` for the approved plan, replacing any older marker.
    pub fn arm(&self, session_id: &str, approved: &Fingerprint) -> StoreResult<()> {
        let path = self.dir.file(session_id, Self::KIND);
        debug!(session = session_id, fingerprint = approved.short(), "approval marker armed");
        self.dir.write(&path, approved.as_str())
    }

    /// Return to `Resolved`.
    pub fn resolve(&self, session_id: &str) -> StoreResult<()> {
        let path = self.dir.file(session_id, Self::KIND);
        self.dir.remove(&path)
    }
}
