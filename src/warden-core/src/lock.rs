//! Lock state, lock records, and their classification.

use serde::{Deserialize, Serialize};

/// The enforcement state of the device. Exactly one value is current at
/// any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Fully usable.
    Unlocked,
    /// Warned-but-usable; uninstall and critical settings blocked.
    SoftLock,
    /// Fully restricted kiosk state.
    HardLock,
}

impl LockState {
    /// Check if any lock is in effect.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !matches!(self, Self::Unlocked)
    }

    /// Check if this is the fully-restricted state.
    #[must_use]
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::HardLock)
    }
}

/// Why a lock was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    /// Tamper indicators or identity mismatch.
    Tamper,
    /// Payment overdue.
    Overdue,
    /// Agent deactivation in progress.
    Deactivation,
    /// Repeated policy violations.
    ComplianceViolation,
    /// Payment or acknowledgment reminder.
    Reminder,
}

impl LockType {
    /// Wire string for this lock type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tamper => "tamper",
            Self::Overdue => "overdue",
            Self::Deactivation => "deactivation",
            Self::ComplianceViolation => "compliance_violation",
            Self::Reminder => "reminder",
        }
    }
}

/// Where a transition originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockSource {
    /// Local detection (tamper re-check, violation report).
    Local,
    /// Remote authority directive.
    Remote,
    /// Re-applied from persisted state at boot.
    Boot,
}

/// A durable record of one lock transition.
///
/// Records are append-only: they are never deleted, only marked resolved.
/// The most recent unresolved hard-lock record is the ground truth used
/// at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The state this transition established.
    pub state: LockState,
    /// Human-readable reason, embedded by value so the record stays valid
    /// even if detection logic changes later.
    pub reason: String,
    /// Where the transition came from.
    pub source: LockSource,
    /// Classification of the lock.
    pub lock_type: LockType,
    /// Unix timestamp of the transition.
    pub timestamp: i64,
    /// When the record was resolved, if it has been.
    pub resolved_at: Option<i64>,
    /// Whether the transition was explicitly requested (by the authority,
    /// an administrator, or confirmed local policy). A hard-lock record
    /// without this flag is treated as corrupt at boot.
    pub explicitly_requested: bool,
}

impl LockRecord {
    /// A fresh unlocked record, the state of a never-locked device.
    #[must_use]
    pub fn unlocked(timestamp: i64) -> Self {
        Self {
            state: LockState::Unlocked,
            reason: String::new(),
            source: LockSource::Local,
            lock_type: LockType::ComplianceViolation,
            timestamp,
            resolved_at: None,
            explicitly_requested: true,
        }
    }

    /// Check if this record is still unresolved.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        self.resolved_at.is_none() && self.state.is_locked()
    }
}

/// Notification payload delivered to the presentation boundary on every
/// transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockNotice {
    /// The state after the transition.
    pub state: LockState,
    /// The reason for the transition.
    pub reason: String,
    /// Classification of the lock.
    pub lock_type: LockType,
    /// Unix timestamp of the transition.
    pub timestamp: i64,
    /// Set when the device control capability has been lost entirely;
    /// the presentation layer must show a distinct status for this.
    pub management_revoked: bool,
}
