//! Content fingerprint of a plan, used to tie an approval to the exact text
//! that was approved.

use serde::{Deserialize, Serialize};

/// BLAKE3 hex digest of plan text. The empty fingerprint is reserved for
/// legacy markers that carried no digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(plan: &str) -> Self {
        Self(blake3::hash(plan.as_bytes()).to_hex().to_string())
    }

    /// Reconstruct a stored fingerprint verbatim (surrounding whitespace trimmed).
    pub fn from_stored(raw: &str) -> Self {
        Self(raw.trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
