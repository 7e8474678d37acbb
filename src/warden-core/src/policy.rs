//! Lock-type classification policy.
//!
//! Directives from the authority carry a lock-type string and a
//! free-form reason; both are mapped through one explicit table to a
//! violation category, and each category maps to exactly one lock type
//! and target state. The table is the policy; there is no keyword
//! branching anywhere else.

use crate::lock::{LockState, LockType};
use crate::tamper::TamperSeverity;

/// Tagged classification of why a lock was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationCategory {
    /// Tamper indicators or integrity mismatch.
    Tamper,
    /// Payment overdue.
    PaymentOverdue,
    /// Repeated policy violations (uninstall attempts, admin disables).
    Compliance,
    /// Payment or acknowledgment reminder.
    Reminder,
    /// Agent deactivation.
    Deactivation,
}

/// The canonical category policy: category → (lock type, target state).
///
/// Tamper and compliance categories hard-lock; payment and reminder
/// categories soft-lock; deactivation is recorded as a soft lock until
/// the removal flow completes.
pub const CATEGORY_POLICY: &[(ViolationCategory, LockType, LockState)] = &[
    (ViolationCategory::Tamper, LockType::Tamper, LockState::HardLock),
    (
        ViolationCategory::Compliance,
        LockType::ComplianceViolation,
        LockState::HardLock,
    ),
    (
        ViolationCategory::PaymentOverdue,
        LockType::Overdue,
        LockState::SoftLock,
    ),
    (
        ViolationCategory::Reminder,
        LockType::Reminder,
        LockState::SoftLock,
    ),
    (
        ViolationCategory::Deactivation,
        LockType::Deactivation,
        LockState::SoftLock,
    ),
];

/// Wire lock-type strings recognized from the authority.
const WIRE_CATEGORIES: &[(&str, ViolationCategory)] = &[
    ("tamper", ViolationCategory::Tamper),
    ("security", ViolationCategory::Tamper),
    ("violation", ViolationCategory::Compliance),
    ("compliance_violation", ViolationCategory::Compliance),
    ("overdue", ViolationCategory::PaymentOverdue),
    ("payment", ViolationCategory::PaymentOverdue),
    ("reminder", ViolationCategory::Reminder),
    ("deactivation", ViolationCategory::Deactivation),
];

/// Reason keywords used when the authority sends no lock type.
///
/// Checked in order; first hit wins. Security keywords come first so a
/// reason like "security issue before payment" never soft-locks.
const REASON_KEYWORDS: &[(&str, ViolationCategory)] = &[
    ("tamper", ViolationCategory::Tamper),
    ("security", ViolationCategory::Tamper),
    ("root", ViolationCategory::Tamper),
    ("violation", ViolationCategory::Compliance),
    ("uninstall", ViolationCategory::Compliance),
    ("payment", ViolationCategory::PaymentOverdue),
    ("overdue", ViolationCategory::PaymentOverdue),
    ("installment", ViolationCategory::PaymentOverdue),
    ("reminder", ViolationCategory::Reminder),
    ("deactivat", ViolationCategory::Deactivation),
];

/// What a classified directive resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDecision {
    /// The category the directive classified into.
    pub category: ViolationCategory,
    /// The lock type to record.
    pub lock_type: LockType,
    /// The state to transition to.
    pub target: LockState,
}

/// Classify an authority lock directive.
///
/// The wire lock-type string is authoritative when present and known;
/// otherwise the reason keywords decide; otherwise the directive is
/// treated as a compliance violation (fail-secure: unknown lock requests
/// hard-lock rather than soft-lock).
///
/// A `Critical` local tamper severity always forces a hard lock
/// regardless of classification.
#[must_use]
pub fn classify_directive(
    lock_type: Option<&str>,
    reason: Option<&str>,
    local_severity: TamperSeverity,
) -> LockDecision {
    let category = lock_type
        .and_then(wire_category)
        .or_else(|| reason.and_then(reason_category))
        .unwrap_or(ViolationCategory::Compliance);

    let mut decision = decision_for(category);

    if local_severity == TamperSeverity::Critical && decision.target != LockState::HardLock {
        // A critically tampered device is never merely warned, whatever
        // the directive said.
        decision = decision_for(ViolationCategory::Tamper);
    }

    decision
}

/// The policy row for a category.
#[must_use]
pub fn decision_for(category: ViolationCategory) -> LockDecision {
    for &(cat, lock_type, target) in CATEGORY_POLICY {
        if cat == category {
            return LockDecision {
                category,
                lock_type,
                target,
            };
        }
    }
    // The table is total over the enum; this arm is unreachable but the
    // compiler cannot see it through the slice.
    LockDecision {
        category: ViolationCategory::Compliance,
        lock_type: LockType::ComplianceViolation,
        target: LockState::HardLock,
    }
}

fn wire_category(lock_type: &str) -> Option<ViolationCategory> {
    let needle = lock_type.trim().to_ascii_lowercase();
    WIRE_CATEGORIES
        .iter()
        .find(|(name, _)| *name == needle)
        .map(|&(_, cat)| cat)
}

fn reason_category(reason: &str) -> Option<ViolationCategory> {
    let haystack = reason.to_ascii_lowercase();
    REASON_KEYWORDS
        .iter()
        .find(|(keyword, _)| haystack.contains(keyword))
        .map(|&(_, cat)| cat)
}
