use thiserror::Error;

/// Reasons the hook input cannot be used.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook input is empty")]
    EmptyInput,

    #[error("hook input is not a JSON object: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read hook input: {0}")]
    Read(#[from] std::io::Error),
}
