//! Plugin error types.

/// Error reported by a plugin, either from its entry point or from a
/// registration call the host rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PluginError {
    /// Initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The host already holds a registration under this name
    #[error("Duplicate {kind} registration: {name}")]
    DuplicateRegistration { kind: String, name: String },

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl PluginError {
    /// Shorthand for [`PluginError::DuplicateRegistration`].
    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        PluginError::DuplicateRegistration {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Plugin result type
pub type PluginResult<T> = Result<T, PluginError>;

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::InvalidConfig(err.to_string())
    }
}
