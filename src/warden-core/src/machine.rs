//! The authoritative lock state machine.
//!
//! This is the only component permitted to change [`LockState`]. All
//! transitions funnel through one async mutex so concurrent hard-lock
//! and unlock calls can never interleave partially-applied restriction
//! sets; reads are lock-free snapshots.
//!
//! ## Ordering guarantee
//!
//! State is persisted *before* any enforcement call runs, so a crash
//! mid-enforcement resumes from the persisted state at the next boot and
//! re-applies the profile idempotently.
//!
//! ## Security Properties
//!
//! - Monotonic escalation: a hard lock is only cleared by an explicit
//!   unlock; no lower-severity event downgrades it.
//! - Fail-secure boot: a persisted hard lock that was never explicitly
//!   requested is treated as corrupt and reset rather than trusted.
//! - An in-flight hard lock runs to completion; a half-applied lock is a
//!   security hole, so there is no cancellation path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use warden_platform::{DeviceControl, PartialResult};

use crate::error::WardenError;
use crate::lock::{LockNotice, LockRecord, LockSource, LockState, LockType};
use crate::store::{now_ts, ComplianceStateStore};

/// What a transition request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// State changed; record written; enforcement ran.
    Applied,
    /// Request was redundant; nothing changed.
    NoOp,
    /// Already in the requested state; enforcement re-asserted without a
    /// new record.
    Reasserted,
    /// Recorded but enforcement suppressed (device mid-registration).
    Recorded,
}

/// The authoritative state machine for device lock state.
pub struct LockStateMachine {
    store: Arc<ComplianceStateStore>,
    control: Arc<dyn DeviceControl>,
    /// Single-writer discipline: at most one transition in flight.
    transition_lock: tokio::sync::Mutex<()>,
    /// Presentation boundary notification channel.
    notice_tx: watch::Sender<LockNotice>,
    /// Set while the device is mid-registration; lock requests are
    /// recorded but not enforced unless authoritative.
    skip_enforcement: AtomicBool,
}

impl LockStateMachine {
    /// Create a machine over the given store and control capability.
    pub fn new(store: Arc<ComplianceStateStore>, control: Arc<dyn DeviceControl>) -> Self {
        let current = store.current_record();
        let (notice_tx, _) = watch::channel(LockNotice {
            state: current.state,
            reason: current.reason.clone(),
            lock_type: current.lock_type,
            timestamp: current.timestamp,
            management_revoked: false,
        });

        Self {
            store,
            control,
            transition_lock: tokio::sync::Mutex::new(()),
            notice_tx,
            skip_enforcement: AtomicBool::new(false),
        }
    }

    /// The current lock record. Never empty: a never-locked device
    /// reports an unlocked record.
    #[must_use]
    pub fn current_lock_state(&self) -> LockRecord {
        self.store.current_record()
    }

    /// The current lock state (snapshot read, no lock taken).
    #[must_use]
    pub fn state(&self) -> LockState {
        self.store.current_record().state
    }

    /// Subscribe to transition notifications.
    ///
    /// The receiver always holds the most recent notice; the
    /// presentation layer renders from this and must not change state
    /// except through [`unlock`](Self::unlock).
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LockNotice> {
        self.notice_tx.subscribe()
    }

    /// Suppress or restore enforcement during registration.
    pub fn set_skip_enforcement(&self, skip: bool) {
        info!(skip, "StateMachine: enforcement suppression changed");
        self.skip_enforcement.store(skip, Ordering::SeqCst);
    }

    /// Apply the warned-but-usable profile.
    ///
    /// No-op when any lock is already in effect: a soft-lock request
    /// never downgrades a hard lock, and repeating a soft lock changes
    /// nothing. The boot source re-asserts enforcement without a record.
    #[instrument(skip(self, reason), fields(source = ?source))]
    pub async fn apply_soft_lock(
        &self,
        reason: &str,
        lock_type: LockType,
        source: LockSource,
    ) -> Result<TransitionOutcome, WardenError> {
        let _guard = self.transition_lock.lock().await;

        let current = self.store.current_record();
        match current.state {
            LockState::HardLock => {
                info!("StateMachine: soft lock ignored, hard lock wins");
                return Ok(TransitionOutcome::NoOp);
            },
            LockState::SoftLock if source != LockSource::Boot => {
                return Ok(TransitionOutcome::NoOp);
            },
            LockState::SoftLock => {
                // Boot re-apply of a persisted soft lock.
                let result = self.control.enforce_soft_profile(reason).await;
                self.log_partial("soft re-assert", &result);
                return Ok(TransitionOutcome::Reasserted);
            },
            LockState::Unlocked => {},
        }

        let record = LockRecord {
            state: LockState::SoftLock,
            reason: reason.to_string(),
            source,
            lock_type,
            timestamp: now_ts(),
            resolved_at: None,
            explicitly_requested: true,
        };

        // State is durable before any enforcement side effect.
        self.store.persist_current(&record);
        self.store.append_history(&record);

        if self.suppressed(source, false) {
            info!(reason = %reason, "StateMachine: soft lock recorded, enforcement suppressed");
            self.notify(&record, false);
            return Ok(TransitionOutcome::Recorded);
        }

        if !self.control.is_management_active() {
            error!("StateMachine: device control capability lost");
            self.notify(&record, true);
            return Err(WardenError::ControlLost {
                message: "management not active during soft lock".into(),
            });
        }

        let result = self.control.enforce_soft_profile(reason).await;
        self.log_partial("soft lock", &result);

        info!(reason = %reason, lock_type = lock_type.as_str(), "StateMachine: soft lock applied");
        self.notify(&record, false);
        Ok(TransitionOutcome::Applied)
    }

    /// Apply the fully-restricted profile.
    ///
    /// With `force == false` and the device already hard-locked, this
    /// re-asserts enforcement without writing a new record (the boot and
    /// retry path). With `force == true` (remote directives, identity
    /// mismatches, local critical tamper) a fresh record is always
    /// written because the reason may have changed.
    #[instrument(skip(self, reason), fields(lock_type = lock_type.as_str(), source = ?source, force))]
    pub async fn apply_hard_lock(
        &self,
        reason: &str,
        lock_type: LockType,
        source: LockSource,
        force: bool,
    ) -> Result<TransitionOutcome, WardenError> {
        let _guard = self.transition_lock.lock().await;

        let current = self.store.current_record();
        if current.state == LockState::HardLock && !force {
            let outcome = self.enforce_hard(reason, source, force).await?;
            return Ok(match outcome {
                TransitionOutcome::Applied => TransitionOutcome::Reasserted,
                other => other,
            });
        }

        let record = LockRecord {
            state: LockState::HardLock,
            reason: reason.to_string(),
            source,
            lock_type,
            timestamp: now_ts(),
            resolved_at: None,
            explicitly_requested: true,
        };

        // State is durable before any enforcement side effect.
        self.store.persist_current(&record);
        self.store.append_history(&record);

        if self.suppressed(source, force) {
            info!(reason = %reason, "StateMachine: hard lock recorded, enforcement suppressed");
            self.notify(&record, false);
            return Ok(TransitionOutcome::Recorded);
        }

        if !self.control.is_management_active() {
            error!("StateMachine: device control capability lost");
            self.notify(&record, true);
            return Err(WardenError::ControlLost {
                message: "management not active during hard lock".into(),
            });
        }

        self.enforce_hard(reason, source, force).await?;

        info!(reason = %reason, lock_type = lock_type.as_str(), "StateMachine: hard lock applied");
        self.notify(&record, false);
        Ok(TransitionOutcome::Applied)
    }

    /// Clear all restrictions and return the device to normal operation.
    ///
    /// Permitted from any state. Marks every unresolved lock record
    /// resolved, persists the unlocked state, and reverses the exact
    /// restriction set that enforcement applied.
    #[instrument(skip(self), fields(source = ?source))]
    pub async fn unlock(&self, source: LockSource) -> Result<TransitionOutcome, WardenError> {
        let _guard = self.transition_lock.lock().await;

        let current = self.store.current_record();
        let was_locked = current.state.is_locked();
        let now = now_ts();

        let resolved = self.store.resolve_unresolved(now);

        let mut record = LockRecord::unlocked(now);
        record.source = source;
        self.store.persist_current(&record);

        // Clearing runs even when enforcement was suppressed or
        // management is gone: leftover restrictions are worse than a
        // redundant clear.
        let result = self.control.clear_all_restrictions().await;
        if !result.is_complete() {
            // A restriction that failed to clear leaves the device
            // partially restricted; this must reach the administrator.
            error!(
                failed = ?result.failed_names(),
                "StateMachine: unlock left restrictions behind"
            );
        }

        info!(
            was_locked,
            records_resolved = resolved,
            cleared = result.applied.len(),
            "StateMachine: unlocked"
        );
        self.notify(&record, false);
        Ok(TransitionOutcome::Applied)
    }

    /// Recover state at process start.
    ///
    /// Reads the boot-tier record. A hard lock that was never explicitly
    /// requested indicates a corrupt or partial write: the safe recovery
    /// is to clear it, not to re-lock on ambiguous state. Everything
    /// else is re-applied through the normal transition paths.
    #[instrument(skip(self))]
    pub async fn recover_from_boot(&self) -> Result<LockState, WardenError> {
        let persisted = self.store.current_record();

        match persisted.state {
            LockState::HardLock if !persisted.explicitly_requested => {
                warn!(
                    reason = %persisted.reason,
                    "StateMachine: persisted hard lock was never explicitly requested, \
                     resetting inconsistent state"
                );
                let _guard = self.transition_lock.lock().await;
                let mut record = LockRecord::unlocked(now_ts());
                record.source = LockSource::Boot;
                self.store.persist_current(&record);
                self.notify(&record, false);
                Ok(LockState::Unlocked)
            },
            LockState::HardLock => {
                info!(reason = %persisted.reason, "StateMachine: re-applying persisted hard lock");
                self.apply_hard_lock(
                    &persisted.reason,
                    persisted.lock_type,
                    LockSource::Boot,
                    true,
                )
                .await?;
                Ok(LockState::HardLock)
            },
            LockState::SoftLock => {
                info!(reason = %persisted.reason, "StateMachine: re-applying persisted soft lock");
                self.apply_soft_lock(&persisted.reason, persisted.lock_type, LockSource::Boot)
                    .await?;
                Ok(LockState::SoftLock)
            },
            LockState::Unlocked => Ok(LockState::Unlocked),
        }
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    /// Run the hard enforcement profile and the terminal screen lock.
    async fn enforce_hard(
        &self,
        reason: &str,
        source: LockSource,
        force: bool,
    ) -> Result<TransitionOutcome, WardenError> {
        if self.suppressed(source, force) {
            return Ok(TransitionOutcome::Recorded);
        }
        if !self.control.is_management_active() {
            return Err(WardenError::ControlLost {
                message: "management not active during hard enforcement".into(),
            });
        }

        let result = self.control.enforce_hard_profile(reason).await;
        self.log_partial("hard lock", &result);

        // Terminal fallback: the immediate screen lock is attempted even
        // if every profile step failed.
        if let Err(e) = self.control.issue_immediate_lock().await {
            warn!(error = %e, "StateMachine: immediate lock failed");
        }

        Ok(TransitionOutcome::Applied)
    }

    /// Whether enforcement is currently suppressed for this request.
    ///
    /// Remote-authority requests and forced requests (identity mismatch,
    /// critical tamper) always override registration suppression.
    fn suppressed(&self, source: LockSource, force: bool) -> bool {
        self.skip_enforcement.load(Ordering::SeqCst) && source != LockSource::Remote && !force
    }

    /// Log a partial enforcement result.
    ///
    /// Partial failures are audit data, not user-visible errors.
    fn log_partial(&self, operation: &str, result: &PartialResult) {
        if result.is_complete() {
            return;
        }
        warn!(
            operation = %operation,
            applied = result.applied.len(),
            failed = ?result.failed_names(),
            "StateMachine: enforcement partially failed, continuing"
        );
    }

    /// Publish a transition notice to the presentation boundary.
    ///
    /// `send_replace` stores the notice even when no subscriber is
    /// connected yet, so a late subscriber still observes the latest
    /// transition.
    fn notify(&self, record: &LockRecord, management_revoked: bool) {
        self.notice_tx.send_replace(LockNotice {
            state: record.state,
            reason: record.reason.clone(),
            lock_type: record.lock_type,
            timestamp: record.timestamp,
            management_revoked,
        });
    }
}
