//! Error types for platform operations.

use thiserror::Error;

/// Errors that can occur at the platform boundary.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// A single tamper-signal probe failed to evaluate.
    #[error("Probe '{probe}' failed: {message}")]
    ProbeFailed {
        /// Name of the probe that failed.
        probe: String,
        /// Error message.
        message: String,
    },

    /// Management authority over the device has been revoked.
    #[error("Device management is not active")]
    ManagementRevoked,

    /// A restriction is not supported on this platform.
    #[error("Restriction {restriction:?} is unsupported on this platform")]
    Unsupported {
        /// The restriction that cannot be enforced here.
        restriction: crate::types::Restriction,
    },

    /// The immediate screen lock could not be issued.
    #[error("Immediate lock failed: {message}")]
    ImmediateLockFailed {
        /// Error message.
        message: String,
    },
}

impl PlatformError {
    /// Check if this error means the control capability is gone entirely.
    ///
    /// Management revocation is the one platform error the core must
    /// surface to the presentation boundary rather than absorb.
    #[must_use]
    pub fn is_management_loss(&self) -> bool {
        matches!(self, Self::ManagementRevoked)
    }
}
