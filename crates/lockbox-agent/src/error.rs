//! Errors raised while wiring the agent together.

/// Failure to build the agent's runtime components.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {reason}")]
    HttpClient { reason: String },
}
