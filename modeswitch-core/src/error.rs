//! Error types for the modeswitch engine.

use thiserror::Error;

/// Errors that can occur in modeswitch operations.
#[derive(Error, Debug)]
pub enum ModesError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Policy violation: {0}")]
    Policy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ModesError {
    pub fn mode_not_enabled(key: &str) -> Self {
        ModesError::NotFound(format!("mode '{}' is not enabled", key))
    }

    /// Short machine-friendly label, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ModesError::Validation(_) => "validation",
            ModesError::Policy(_) => "policy",
            ModesError::NotFound(_) => "not_found",
            ModesError::Persistence(_) => "persistence",
            ModesError::Config(_) => "config",
            ModesError::Io(_) => "io",
            ModesError::Serialization(_) => "serialization",
        }
    }
}

/// Result type alias for modeswitch operations.
pub type ModesResult<T> = Result<T, ModesError>;
