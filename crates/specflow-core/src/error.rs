use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecflowError {
    #[error("invalid {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("invalid phase: {0}")]
    InvalidPhase(String),

    #[error("invalid category: {0}")]
    InvalidCategory(String),

    #[error("invalid event type: {0}")]
    InvalidEventType(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("reload of {category} failed: {message}")]
    Reload { category: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Watch(#[from] notify::Error),
}

impl SpecflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        SpecflowError::Validation(msg.into())
    }

    pub fn rule_not_found(id: impl Into<String>) -> Self {
        SpecflowError::NotFound {
            kind: "rule",
            id: id.into(),
        }
    }

    pub fn document_not_found(name: impl Into<String>) -> Self {
        SpecflowError::NotFound {
            kind: "document",
            id: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SpecflowError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, SpecflowError>;
