use thiserror::Error;

/// Failures surfaced by the store adapters and the triage controller.
///
/// Cloneable so a failure can be recorded in controller state and broadcast
/// to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    /// Transport failure or a non-success status other than 404.
    #[error("network error: {0}")]
    Network(String),
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },
    /// The input or the backend's payload did not satisfy the record shape.
    #[error("validation error: {0}")]
    Validation(String),
}

impl WorkflowError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for WorkflowError {
    fn from(value: reqwest::Error) -> Self {
        Self::Network(value.to_string())
    }
}

impl From<url::ParseError> for WorkflowError {
    fn from(value: url::ParseError) -> Self {
        Self::Validation(format!("invalid backend url: {value}"))
    }
}
