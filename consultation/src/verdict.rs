//! Verdict extraction from untrusted engine output.
//!
//! The engine must answer with a `<verdict>KEYWORD</verdict>` tag. Anything
//! else (missing tag, malformed tag, a bare keyword in prose) fails closed
//! to `Concerns`. Extraction is a total function and never panics.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Matched against lowercased text; the first tag wins.
static VERDICT_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<verdict>\s*(approve|concerns|reject)\s*</verdict>")
        .expect("VERDICT_TAG regex should compile")
});

/// The engine's categorical judgment of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Plan can proceed.
    Approve,
    /// Non-critical issues; counts against the non-critical round budget.
    Concerns,
    /// Critical flaw; resets non-critical progress.
    Reject,
}

impl Verdict {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "approve" => Some(Self::Approve),
            "concerns" => Some(Self::Concerns),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Concerns => write!(f, "CONCERNS"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

/// How a verdict was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extraction {
    /// Read from a well-formed tag.
    Tagged(Verdict),
    /// No well-formed tag; defaulted to `Concerns`.
    FailClosed,
}

impl Extraction {
    pub fn verdict(self) -> Verdict {
        match self {
            Self::Tagged(v) => v,
            Self::FailClosed => Verdict::Concerns,
        }
    }
}

/// Classify raw engine output without emitting diagnostics.
pub fn classify(raw: &str) -> Extraction {
    let normalized = raw.to_lowercase();
    VERDICT_TAG
        .captures(&normalized)
        .and_then(|caps| caps.get(1))
        .and_then(|m| Verdict::from_keyword(m.as_str()))
        .map_or(Extraction::FailClosed, Extraction::Tagged)
}

/// Extract the verdict from raw engine output, failing closed to `Concerns`.
pub fn extract(raw: &str) -> Verdict {
    let extraction = classify(raw);
    if extraction == Extraction::FailClosed {
        warn!(
            response_len = raw.len(),
            "no well-formed <verdict> tag in engine response, defaulting to CONCERNS"
        );
    }
    extraction.verdict()
}
