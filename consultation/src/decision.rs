//! Hook decision: the single JSON document written to stdout.
//!
//! ```json
//! { "hookSpecificOutput": {
//!     "hookEventName": "PreToolUse",
//!     "permissionDecision": "deny",
//!     "permissionDecisionReason": "..." } }
//! ```

use serde::{Deserialize, Serialize};

/// Host event the decision answers.
pub const HOOK_EVENT_NAME: &str = "PreToolUse";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allow,
    Deny,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

/// An allow or deny with the message shown to the calling agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub permission: Permission,
    pub reason: String,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            permission: Permission::Allow,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permission: Permission::Deny,
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        self.permission == Permission::Allow
    }

    pub fn to_output(&self) -> HookOutput {
        HookOutput {
            hook_specific_output: HookSpecificOutput {
                hook_event_name: HOOK_EVENT_NAME.to_string(),
                permission_decision: self.permission,
                permission_decision_reason: self.reason.clone(),
            },
        }
    }

    /// Serialize to the host's JSON contract.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_output())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookOutput {
    #[serde(rename = "hookSpecificOutput")]
    pub hook_specific_output: HookSpecificOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    pub hook_event_name: String,
    pub permission_decision: Permission,
    pub permission_decision_reason: String,
}
