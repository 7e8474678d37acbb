//! Violation escalation tracking.
//!
//! Repeated violations of one category accumulate in a durable counter;
//! crossing the category threshold yields a hard-lock decision. The
//! increment is persisted *before* the threshold is evaluated so a crash
//! between the two never loses a count. Counters only ever go up until
//! an administrator explicitly resets them; partial remediation cannot
//! silently restart the ladder.

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::config::PolicyConfig;
use crate::store::{now_ts, ComplianceStateStore, EscalationCounter};

/// Well-known violation categories reported by local watchers.
pub mod categories {
    /// The user attempted to uninstall the agent.
    pub const UNINSTALL_ATTEMPT: &str = "uninstall_attempt";
    /// The user attempted to disable the management admin.
    pub const ADMIN_DISABLE_ATTEMPT: &str = "admin_disable_attempt";
}

/// Outcome of recording one violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationDecision {
    /// The category that was incremented.
    pub category: String,
    /// The count after the increment.
    pub count: u32,
    /// Whether the threshold has been crossed.
    pub should_lock_hard: bool,
}

/// Tracks violation counts per category.
pub struct EscalationTracker {
    store: Arc<ComplianceStateStore>,
    policy: PolicyConfig,
    /// Serializes increment-then-evaluate so concurrent reports of the
    /// same category cannot lose updates.
    guard: Mutex<()>,
}

impl EscalationTracker {
    /// Create a tracker over the given store and policy.
    pub fn new(store: Arc<ComplianceStateStore>, policy: PolicyConfig) -> Self {
        Self {
            store,
            policy,
            guard: Mutex::new(()),
        }
    }

    /// Record one qualifying violation and decide whether to escalate.
    pub fn record_violation(&self, category: &str) -> EscalationDecision {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());

        let mut counter = self
            .store
            .counter(category)
            .unwrap_or_else(|| EscalationCounter {
                category: category.to_string(),
                count: 0,
                last_event_at: 0,
            });

        counter.count += 1;
        counter.last_event_at = now_ts();

        // Persist first: losing the decision is recoverable, losing the
        // count is not.
        self.store.put_counter(counter.clone());

        let threshold = self.policy.threshold(category);
        let should_lock_hard = counter.count >= threshold;

        if should_lock_hard {
            warn!(
                category = %category,
                count = counter.count,
                threshold,
                "Escalation: threshold crossed"
            );
        } else {
            info!(
                category = %category,
                count = counter.count,
                threshold,
                "Escalation: violation recorded"
            );
        }

        EscalationDecision {
            category: category.to_string(),
            count: counter.count,
            should_lock_hard,
        }
    }

    /// Current count for a category.
    #[must_use]
    pub fn count(&self, category: &str) -> u32 {
        self.store.counter(category).map(|c| c.count).unwrap_or(0)
    }

    /// Administrator-only: reset a category back to zero.
    ///
    /// Nothing in the agent calls this automatically.
    pub fn reset(&self, category: &str) {
        let _guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        self.store.remove_counter(category);
        info!(category = %category, "Escalation: counter reset by administrator");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_with_threshold(threshold: u32) -> (EscalationTracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
        store.init().unwrap();
        let policy = PolicyConfig {
            default_threshold: threshold,
            ..PolicyConfig::default()
        };
        (EscalationTracker::new(store, policy), dir)
    }

    #[test]
    fn test_threshold_crossing() {
        let (tracker, _dir) = tracker_with_threshold(3);

        let first = tracker.record_violation(categories::UNINSTALL_ATTEMPT);
        assert_eq!(first.count, 1);
        assert!(!first.should_lock_hard);

        let second = tracker.record_violation(categories::UNINSTALL_ATTEMPT);
        assert!(!second.should_lock_hard);

        let third = tracker.record_violation(categories::UNINSTALL_ATTEMPT);
        assert_eq!(third.count, 3);
        assert!(third.should_lock_hard);
    }

    #[test]
    fn test_counts_keep_growing_past_threshold() {
        let (tracker, _dir) = tracker_with_threshold(2);
        tracker.record_violation("x");
        tracker.record_violation("x");
        let decision = tracker.record_violation("x");

        assert_eq!(decision.count, 3);
        assert!(decision.should_lock_hard);
    }

    #[test]
    fn test_categories_are_independent() {
        let (tracker, _dir) = tracker_with_threshold(3);
        tracker.record_violation(categories::UNINSTALL_ATTEMPT);
        tracker.record_violation(categories::UNINSTALL_ATTEMPT);

        let other = tracker.record_violation(categories::ADMIN_DISABLE_ATTEMPT);
        assert_eq!(other.count, 1);
        assert!(!other.should_lock_hard);
    }

    #[test]
    fn test_reset_is_explicit_only() {
        let (tracker, _dir) = tracker_with_threshold(3);
        tracker.record_violation("x");
        tracker.record_violation("x");
        tracker.record_violation("x");

        tracker.reset("x");
        assert_eq!(tracker.count("x"), 0);

        let after = tracker.record_violation("x");
        assert_eq!(after.count, 1);
        assert!(!after.should_lock_hard);
    }

    #[test]
    fn test_count_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let policy = PolicyConfig::default();
        {
            let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
            store.init().unwrap();
            let tracker = EscalationTracker::new(store, policy.clone());
            tracker.record_violation("x");
            tracker.record_violation("x");
        }

        let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
        store.init().unwrap();
        let tracker = EscalationTracker::new(store, policy);
        assert_eq!(tracker.count("x"), 2);

        let decision = tracker.record_violation("x");
        assert_eq!(decision.count, 3);
        assert!(decision.should_lock_hard);
    }
}
