//! Error types for the reconciliation engine.

use thiserror::Error;

/// Errors that can occur inside the warden core.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Durable state could not be read or written.
    #[error("Store error: {message}")]
    Store {
        /// Error message.
        message: String,
    },

    /// The heartbeat or queue delivery could not reach the authority.
    #[error("Transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// Persisted state contradicts an invariant at boot.
    #[error("Inconsistent persisted state: {message}")]
    Inconsistent {
        /// What contradicted what.
        message: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// The device control capability is gone (management revoked).
    #[error("Device control capability lost: {message}")]
    ControlLost {
        /// Error message.
        message: String,
    },

    /// The agent command channel is closed; the actor has shut down.
    #[error("Agent is not running")]
    AgentStopped,

    /// Platform boundary error.
    #[error("Platform error: {0}")]
    Platform(#[from] warden_platform::PlatformError),
}

impl WardenError {
    /// Check if this error is recoverable by the next scheduled cycle.
    ///
    /// Transport failures are always retried by the schedule, never
    /// inline.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// Check if this error must be surfaced to the presentation boundary
    /// as a distinct status rather than absorbed.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::ControlLost { .. } => true,
            Self::Platform(e) => e.is_management_loss(),
            _ => false,
        }
    }
}
