//! Error types for proxy-guard.

/// Result type alias for proxy-guard operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors that can occur while watching and enforcing the configuration entry.
///
/// Payloads are plain strings so that errors can be cloned into the published
/// [`SupervisorState`](crate::core::SupervisorState).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    /// The configuration location could not be opened with the required rights.
    #[error("Failed to open configuration location '{path}': {reason}")]
    Access {
        /// Location that was being opened
        path: String,
        /// Why the open was refused
        reason: String,
    },

    /// Reading the watched entry failed for a reason other than it being absent.
    #[error("Failed to read entry '{name}': {reason}")]
    Read {
        /// Entry name
        name: String,
        /// Underlying fault
        reason: String,
    },

    /// Writing the watched entry failed.
    #[error("Failed to write entry '{name}': {reason}")]
    Write {
        /// Entry name
        name: String,
        /// Underlying fault
        reason: String,
    },

    /// The change notification could not be registered.
    #[error("Failed to arm change notification: {0}")]
    Arm(String),

    /// Waiting for the change notification failed.
    #[error("Failed to wait for change notification: {0}")]
    Wait(String),

    /// A notification token was waited on after it had already fired.
    #[error("Notification token already consumed; it must be re-armed")]
    TokenSpent,

    /// Runtime settings were missing or invalid.
    #[error("Invalid settings: {0}")]
    Settings(String),

    /// The requested backend does not exist on this platform.
    #[error("Backend not supported on this platform: {0}")]
    Unsupported(&'static str),
}

impl WatchError {
    /// Create an access error for `path`.
    pub fn access(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Access {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a read error for entry `name`.
    pub fn read(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Read {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a write error for entry `name`.
    pub fn write(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Write {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error ends the watch loop.
    ///
    /// Reconciliation faults (`Read`, `Write`) are transient: they are logged and the
    /// loop keeps waiting for the next change. Everything else is fatal, although
    /// notification failures are retried with backoff before the supervisor gives up.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Read { .. } | Self::Write { .. })
    }

    /// Whether this error comes from the notification subsystem and may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Arm(_) | Self::Wait(_) | Self::TokenSpent)
    }
}

impl From<config::ConfigError> for WatchError {
    fn from(err: config::ConfigError) -> Self {
        WatchError::Settings(err.to_string())
    }
}
