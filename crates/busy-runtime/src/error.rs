// Error types for the BUSY runtime

use crate::execution::ExecutionLogEntry;
use thiserror::Error;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A requirement's priority chain was exhausted
    #[error("Unable to allocate a resource for requirement '{requirement}' in step '{step}'")]
    ResourceAllocation {
        /// Step the allocation was made for
        step: String,
        /// Requirement that could not be satisfied
        requirement: String,
    },

    /// The execution strategy chain was exhausted; displays the last executor failure verbatim
    #[error("{message}")]
    Execution {
        /// Step that failed
        step: String,
        /// Last failure reported by an executor
        message: String,
        /// Full fallback trail
        logs: Vec<ExecutionLogEntry>,
    },

    /// An instance with the same id is already registered
    #[error("Resource instance '{0}' is already registered")]
    DuplicateResource(String),

    /// The loader has no playbook with this name
    #[error("Playbook not found: {0}")]
    PlaybookNotFound(String),

    /// The definition loader failed
    #[error("Definition loader error: {0}")]
    Loader(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The runtime has been shut down
    #[error("Runtime has been shut down")]
    ShutDown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RuntimeError {
    /// Returns `true` for errors that abort a playbook because of allocation.
    #[must_use]
    pub fn is_allocation(&self) -> bool {
        matches!(self, Self::ResourceAllocation { .. })
    }

    /// Returns `true` for errors that abort a playbook because every strategy failed.
    #[must_use]
    pub fn is_execution(&self) -> bool {
        matches!(self, Self::Execution { .. })
    }
}
