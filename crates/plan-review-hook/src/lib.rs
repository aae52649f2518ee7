//! Plan review hook: reads one tool event from stdin, consults a review
//! engine through the `consultation` state machine, and writes at most one
//! permission decision to stdout.

pub mod config;
pub mod error;
pub mod hook;
pub mod input;
pub mod logging;
pub mod plan_source;
pub mod prompt;
pub mod transcript;

pub use config::HookConfig;
pub use error::HookError;
pub use input::HookInput;
