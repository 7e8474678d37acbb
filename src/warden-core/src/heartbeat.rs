//! Heartbeat reconciliation with the remote authority.
//!
//! Each cycle builds a compliance snapshot (identity + tamper + lock
//! state), posts it, and converges local state onto the authority's
//! directive:
//!
//! 1. An `expected_identity` mismatch is the strongest signal in the
//!    system (device clone/swap detection): it forces a hard lock and
//!    bypasses the classifier entirely.
//! 2. `should_be_locked` with the device unlocked escalates through the
//!    policy classifier; critical local tamper always hard-locks
//!    whatever the classification says.
//! 3. `should_be_locked == false` with the device locked unlocks.
//! 4. Agreement is a no-op.
//!
//! Transport failures mutate nothing; the next scheduled beat is the
//! retry. Local critical tamper is never gated on heartbeat success:
//! [`HeartbeatReconciler::check_local_tamper`] applies it immediately and
//! runs from the fast re-check task as well as from each beat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::authority::Authority;
use crate::error::WardenError;
use crate::lock::{LockSource, LockState, LockType};
use crate::machine::LockStateMachine;
use crate::policy::classify_directive;
use crate::queue::OfflineCommandQueue;
use crate::tamper::{TamperDetector, TamperSeverity, TamperStatus};
use crate::types::{
    AuthorityDirective, DeviceIdentity, HeartbeatRequest, INSTRUCTION_DEACTIVATE,
};

/// Queue category for tamper alerts.
const ALERT_CATEGORY_TAMPER: &str = "tamper_alert";

/// What one reconciliation cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local and remote already agreed.
    InSync,
    /// The directive locked the device.
    Locked(LockState),
    /// The directive unlocked the device.
    Unlocked,
    /// An identity mismatch forced a hard lock.
    IdentityMismatch {
        /// The field that did not match.
        field: String,
    },
}

/// Reconciles local lock state with the remote authority.
pub struct HeartbeatReconciler {
    authority: Arc<dyn Authority>,
    detector: Arc<TamperDetector>,
    machine: Arc<LockStateMachine>,
    queue: Arc<OfflineCommandQueue>,
    identity: DeviceIdentity,
    sequence: AtomicU64,
}

impl HeartbeatReconciler {
    /// Create a reconciler.
    pub fn new(
        authority: Arc<dyn Authority>,
        detector: Arc<TamperDetector>,
        machine: Arc<LockStateMachine>,
        queue: Arc<OfflineCommandQueue>,
        mut identity: DeviceIdentity,
    ) -> Self {
        identity.normalize();
        Self {
            authority,
            detector,
            machine,
            queue,
            identity,
            sequence: AtomicU64::new(0),
        }
    }

    /// Evaluate local tamper state and lock immediately on critical
    /// severity.
    ///
    /// This path is independent of the heartbeat: it runs from the fast
    /// re-check task and must never wait on the network.
    #[instrument(skip(self))]
    pub async fn check_local_tamper(&self) -> Result<TamperStatus, WardenError> {
        let status = self.detector.evaluate();

        if status.severity == TamperSeverity::Critical {
            let reason = format!(
                "critical tamper indicators: {}",
                status
                    .indicators
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            // Force a fresh record on first detection; subsequent checks
            // re-assert the existing lock idempotently instead of
            // spamming records and alerts every cycle.
            let first_detection = self.machine.state() != LockState::HardLock;
            if first_detection {
                warn!(reason = %reason, "Reconciler: critical local tamper, hard locking");
            }

            self.machine
                .apply_hard_lock(&reason, LockType::Tamper, LockSource::Local, first_detection)
                .await?;

            if first_detection {
                self.queue
                    .enqueue(
                        ALERT_CATEGORY_TAMPER,
                        serde_json::json!({
                            "kind": "critical_tamper",
                            "indicators": status.indicators,
                            "severity": status.severity,
                        }),
                    )
                    .await;
            }
        }

        Ok(status)
    }

    /// Run one full heartbeat cycle.
    #[instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<ReconcileOutcome, WardenError> {
        // Local critical tamper applies before and regardless of the
        // network round-trip.
        let tamper = self.check_local_tamper().await?;

        let request = HeartbeatRequest {
            identity: self.identity.clone(),
            tamper: tamper.clone(),
            lock_state: self.machine.state(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };

        // Transport failure leaves state unchanged; the next scheduled
        // beat is the retry.
        let directive = self.authority.heartbeat(&request).await?;

        let outcome = self.apply_directive(&directive, tamper.severity).await?;

        // Connectivity is proven; flush anything queued while offline.
        let authority = self.authority.clone();
        let report = self
            .queue
            .drain(move |cmd| {
                let authority = authority.clone();
                async move { authority.deliver(&cmd).await }
            })
            .await;
        if report.delivered > 0 || report.rescheduled > 0 {
            debug!(
                delivered = report.delivered,
                rescheduled = report.rescheduled,
                "Reconciler: queue drained"
            );
        }

        Ok(outcome)
    }

    /// Apply an authority directive to the state machine.
    ///
    /// Public so push-delivered directives reuse the exact heartbeat
    /// semantics.
    pub async fn apply_directive(
        &self,
        directive: &AuthorityDirective,
        local_severity: TamperSeverity,
    ) -> Result<ReconcileOutcome, WardenError> {
        // Field-level integrity check first: a clone/swap signal beats
        // everything else in the response.
        if let Some(expected) = &directive.expected_identity {
            if let Some(field) = self.first_identity_mismatch(expected) {
                let reason = format!("identity mismatch on '{field}'");
                warn!(field = %field, "Reconciler: expected-identity mismatch, forcing hard lock");

                self.machine
                    .apply_hard_lock(&reason, LockType::Tamper, LockSource::Remote, true)
                    .await?;
                return Ok(ReconcileOutcome::IdentityMismatch { field });
            }
        }

        let current = self.machine.state();

        if directive.should_be_locked && current == LockState::Unlocked {
            let decision = classify_directive(
                directive.lock_type.as_deref(),
                directive.block_reason.as_deref(),
                local_severity,
            );
            let reason = directive
                .block_reason
                .clone()
                .unwrap_or_else(|| "locked by remote authority".to_string());

            info!(
                target = ?decision.target,
                lock_type = decision.lock_type.as_str(),
                "Reconciler: directive escalates lock state"
            );

            match decision.target {
                LockState::HardLock => {
                    self.machine
                        .apply_hard_lock(&reason, decision.lock_type, LockSource::Remote, true)
                        .await?;
                },
                _ => {
                    self.machine
                        .apply_soft_lock(&reason, decision.lock_type, LockSource::Remote)
                        .await?;
                },
            }
            return Ok(ReconcileOutcome::Locked(decision.target));
        }

        if !directive.should_be_locked && current.is_locked() {
            info!("Reconciler: directive clears lock state");
            self.machine.unlock(LockSource::Remote).await?;
            self.handle_instructions(directive);
            return Ok(ReconcileOutcome::Unlocked);
        }

        self.handle_instructions(directive);
        debug!(state = ?current, "Reconciler: local and remote agree");
        Ok(ReconcileOutcome::InSync)
    }

    /// Find the first expected-identity field that does not match.
    ///
    /// Unknown field names are ignored (absence of a directive, not an
    /// error); comparison is normalized the way the authority normalizes
    /// registration baselines.
    fn first_identity_mismatch(
        &self,
        expected: &std::collections::BTreeMap<String, String>,
    ) -> Option<String> {
        for (field, expected_value) in expected {
            let Some(actual) = self.identity.field(field) else {
                continue;
            };
            if normalize(&actual) != normalize(expected_value) {
                return Some(field.clone());
            }
        }
        None
    }

    /// Surface directive instructions.
    fn handle_instructions(&self, directive: &AuthorityDirective) {
        for instruction in &directive.instructions {
            if instruction == INSTRUCTION_DEACTIVATE {
                info!("Reconciler: authority requested agent deactivation");
            } else {
                debug!(instruction = %instruction, "Reconciler: unhandled instruction");
            }
        }
    }
}

/// Normalize a value for identity comparison: trim, lowercase, and
/// collapse list separators.
fn normalize(value: &str) -> String {
    let mut parts: Vec<String> = value
        .split(',')
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    parts.sort();
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::queue::QueuedCommand;
    use crate::store::ComplianceStateStore;
    use warden_platform::{SoftwareDeviceControl, StaticProbes};

    /// Scripted authority for reconciliation tests.
    struct ScriptedAuthority {
        directives: Mutex<Vec<AuthorityDirective>>,
        fail_delivery: bool,
    }

    impl ScriptedAuthority {
        fn returning(directive: AuthorityDirective) -> Self {
            Self {
                directives: Mutex::new(vec![directive]),
                fail_delivery: false,
            }
        }
    }

    #[async_trait]
    impl Authority for ScriptedAuthority {
        async fn heartbeat(
            &self,
            _request: &HeartbeatRequest,
        ) -> Result<AuthorityDirective, WardenError> {
            let mut directives = self.directives.lock().unwrap();
            if directives.is_empty() {
                Err(WardenError::Transport {
                    message: "offline".into(),
                })
            } else {
                Ok(directives.remove(0))
            }
        }

        async fn deliver(&self, _command: &QueuedCommand) -> Result<(), WardenError> {
            if self.fail_delivery {
                Err(WardenError::Transport {
                    message: "offline".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn fixture(
        probes: StaticProbes,
        authority: ScriptedAuthority,
    ) -> (HeartbeatReconciler, Arc<LockStateMachine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
        store.init().unwrap();
        let control = Arc::new(SoftwareDeviceControl::new());
        let machine = Arc::new(LockStateMachine::new(store.clone(), control));
        let queue = Arc::new(OfflineCommandQueue::new(
            store,
            std::time::Duration::from_secs(30),
            std::time::Duration::from_secs(3600),
        ));
        let detector = Arc::new(TamperDetector::new(Arc::new(probes)));

        let identity = DeviceIdentity {
            device_id: "device-1".into(),
            serial_number: "SN123".into(),
            imeis: vec!["352099001761481".into()],
            manufacturer: "acme".into(),
            model: "tab-10".into(),
            os_version: "14".into(),
            fingerprint: "acme/tab10/14:user".into(),
        };

        let reconciler = HeartbeatReconciler::new(
            Arc::new(authority),
            detector,
            machine.clone(),
            queue,
            identity,
        );
        (reconciler, machine, dir)
    }

    #[tokio::test]
    async fn test_lock_directive_converges() {
        let directive = AuthorityDirective {
            should_be_locked: true,
            lock_type: Some("tamper".into()),
            block_reason: Some("Security issue".into()),
            ..AuthorityDirective::default()
        };
        let (reconciler, machine, _dir) =
            fixture(StaticProbes::clean(), ScriptedAuthority::returning(directive));

        let outcome = reconciler.reconcile_once().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Locked(LockState::HardLock));
        assert_eq!(machine.state(), LockState::HardLock);
        assert_eq!(machine.current_lock_state().lock_type, LockType::Tamper);
    }

    #[tokio::test]
    async fn test_payment_directive_soft_locks() {
        let directive = AuthorityDirective {
            should_be_locked: true,
            block_reason: Some("Payment overdue".into()),
            ..AuthorityDirective::default()
        };
        let (reconciler, machine, _dir) =
            fixture(StaticProbes::clean(), ScriptedAuthority::returning(directive));

        let outcome = reconciler.reconcile_once().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Locked(LockState::SoftLock));
        assert_eq!(machine.state(), LockState::SoftLock);
    }

    #[tokio::test]
    async fn test_unlock_directive_converges() {
        let (reconciler, machine, _dir) = fixture(
            StaticProbes::clean(),
            ScriptedAuthority::returning(AuthorityDirective::default()),
        );

        machine
            .apply_soft_lock("reminder", LockType::Reminder, LockSource::Remote)
            .await
            .unwrap();

        let outcome = reconciler.reconcile_once().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unlocked);
        assert_eq!(machine.state(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_agreement_is_noop() {
        let (reconciler, machine, _dir) = fixture(
            StaticProbes::clean(),
            ScriptedAuthority::returning(AuthorityDirective::default()),
        );

        let outcome = reconciler.reconcile_once().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert_eq!(machine.state(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_identity_mismatch_overrides_everything() {
        let mut expected = BTreeMap::new();
        expected.insert("serial_number".to_string(), "DIFFERENT".to_string());
        let directive = AuthorityDirective {
            // Even an unlock directive cannot override a mismatch.
            should_be_locked: false,
            expected_identity: Some(expected),
            ..AuthorityDirective::default()
        };
        let (reconciler, machine, _dir) =
            fixture(StaticProbes::clean(), ScriptedAuthority::returning(directive));

        let outcome = reconciler.reconcile_once().await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::IdentityMismatch {
                field: "serial_number".into()
            }
        );
        assert_eq!(machine.state(), LockState::HardLock);
    }

    #[tokio::test]
    async fn test_matching_identity_passes() {
        let mut expected = BTreeMap::new();
        // Case and whitespace differences are not mismatches.
        expected.insert("serial_number".to_string(), " sn123 ".to_string());
        expected.insert("unknown_field".to_string(), "anything".to_string());
        let directive = AuthorityDirective {
            expected_identity: Some(expected),
            ..AuthorityDirective::default()
        };
        let (reconciler, machine, _dir) =
            fixture(StaticProbes::clean(), ScriptedAuthority::returning(directive));

        let outcome = reconciler.reconcile_once().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InSync);
        assert_eq!(machine.state(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_state_unchanged() {
        let authority = ScriptedAuthority {
            directives: Mutex::new(Vec::new()),
            fail_delivery: false,
        };
        let (reconciler, machine, _dir) = fixture(StaticProbes::clean(), authority);

        let err = reconciler.reconcile_once().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(machine.state(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_critical_tamper_locks_before_network() {
        // Authority is unreachable; the critical indicator must still
        // hard-lock.
        let authority = ScriptedAuthority {
            directives: Mutex::new(Vec::new()),
            fail_delivery: false,
        };
        let probes = StaticProbes {
            rooted: true,
            ..StaticProbes::default()
        };
        let (reconciler, machine, _dir) = fixture(probes, authority);

        let _ = reconciler.reconcile_once().await;
        assert_eq!(machine.state(), LockState::HardLock);
        assert_eq!(machine.current_lock_state().lock_type, LockType::Tamper);
    }

    #[tokio::test]
    async fn test_critical_tamper_overrides_soft_directive() {
        let directive = AuthorityDirective {
            should_be_locked: true,
            lock_type: Some("reminder".into()),
            block_reason: Some("Payment reminder".into()),
            ..AuthorityDirective::default()
        };
        let probes = StaticProbes {
            bootloader_unlocked: true,
            ..StaticProbes::default()
        };
        let (reconciler, machine, _dir) = fixture(probes, ScriptedAuthority::returning(directive));

        let _ = reconciler.reconcile_once().await;
        // The critical indicator already hard-locked in the local phase;
        // the reminder directive cannot soften that.
        assert_eq!(machine.state(), LockState::HardLock);
    }
}
