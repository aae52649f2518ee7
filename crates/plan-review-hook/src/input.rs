//! Hook input contract: one JSON object per invocation on stdin.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::HookError;

/// The triggering tool event. Unknown fields are ignored; every field is
/// optional so that unrelated tool events still decode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub tool_input: serde_json::Value,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
}

impl HookInput {
    pub fn parse(raw: &str) -> Result<Self, HookError> {
        if raw.trim().is_empty() {
            return Err(HookError::EmptyInput);
        }
        Ok(serde_json::from_str(raw)?)
    }

    pub fn tool_name(&self) -> &str {
        self.tool_name.as_deref().unwrap_or_default()
    }

    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or_default()
    }

    /// `tool_input.plan` when present as a string.
    pub fn plan(&self) -> Option<&str> {
        self.tool_input.get("plan").and_then(|v| v.as_str())
    }

    /// Working directory, if it names an existing directory.
    pub fn working_dir(&self) -> Option<PathBuf> {
        self.cwd.clone().filter(|p| p.is_dir())
    }
}
