use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while replaying a workflow.
///
/// Fatal variants unwind to the runner, which tears the session down and
/// reports a failed run. The others stay inside the step that produced them
/// and only surface as log entries.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Navigation to {url} failed: {reason}")]
    NavigationFailure { url: String, reason: String },

    #[error("Timed out after {timeout:?} waiting for workflow steps ({selector})")]
    ExtractionTimeout { selector: String, timeout: Duration },

    #[error("Timed out after {timeout:?} waiting for {selector}")]
    Timeout { selector: String, timeout: Duration },

    #[error("Element not found -> {0}")]
    ResolutionFailure(String),

    #[error("Cannot type \"{0}\"")]
    InjectionFailure(String),

    #[error("No new page appeared within {0:?}")]
    SwitchTimeout(Duration),

    #[error("Element action failed: {0}")]
    ElementAction(String),

    #[error("Browser session fault: {0}")]
    SessionFault(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ReplayError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        match self {
            ReplayError::InvalidInput(_)
            | ReplayError::NavigationFailure { .. }
            | ReplayError::ExtractionTimeout { .. }
            | ReplayError::SessionFault(_)
            | ReplayError::Cancelled
            | ReplayError::Config(_) => true,
            ReplayError::Timeout { .. }
            | ReplayError::ResolutionFailure(_)
            | ReplayError::InjectionFailure(_)
            | ReplayError::SwitchTimeout(_)
            | ReplayError::ElementAction(_) => false,
        }
    }
}
