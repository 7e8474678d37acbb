//! End-to-end reconciliation scenarios.

use std::sync::Arc;

use warden_core::store::ComplianceStateStore;
use warden_core::tamper::TamperDetector;
use warden_core::{
    AuthorityDirective, HeartbeatReconciler, LockSource, LockState, LockStateMachine, LockType,
    OfflineCommandQueue, ReconcileOutcome,
};
use warden_platform::{DeviceControl, SoftwareDeviceControl, StaticProbes};

use crate::support::{test_identity, ScriptedAuthority};

struct Fixture {
    reconciler: HeartbeatReconciler,
    machine: Arc<LockStateMachine>,
    store: Arc<ComplianceStateStore>,
    control: Arc<SoftwareDeviceControl>,
    _dir: tempfile::TempDir,
}

fn fixture(probes: StaticProbes, authority: Arc<ScriptedAuthority>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
    store.init().unwrap();
    let control = Arc::new(SoftwareDeviceControl::new());
    let machine = Arc::new(LockStateMachine::new(store.clone(), control.clone()));
    let queue = Arc::new(OfflineCommandQueue::new(
        store.clone(),
        std::time::Duration::from_millis(1),
        std::time::Duration::from_secs(1),
    ));
    let detector = Arc::new(TamperDetector::new(Arc::new(probes)));

    Fixture {
        reconciler: HeartbeatReconciler::new(
            authority,
            detector,
            machine.clone(),
            queue,
            test_identity(),
        ),
        machine,
        store,
        control,
        _dir: dir,
    }
}

#[tokio::test]
async fn soft_locked_device_unlocks_on_clear_directive() {
    let authority = ScriptedAuthority::new(vec![AuthorityDirective::default()]);
    let fx = fixture(StaticProbes::clean(), authority);

    fx.machine
        .apply_soft_lock("Payment overdue", LockType::Overdue, LockSource::Remote)
        .await
        .unwrap();
    assert_eq!(fx.machine.state(), LockState::SoftLock);

    let outcome = fx.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Unlocked);
    assert_eq!(fx.machine.state(), LockState::Unlocked);

    // The soft-lock record is resolved, not deleted.
    let history = fx.store.history();
    assert_eq!(history.len(), 1);
    assert!(history[0].resolved_at.is_some());

    // No restrictions left behind.
    assert!(fx.control.active_restrictions().is_empty());
}

#[tokio::test]
async fn tamper_directive_converges_to_hard_lock() {
    let authority = ScriptedAuthority::new(vec![AuthorityDirective {
        should_be_locked: true,
        lock_type: Some("tamper".into()),
        block_reason: Some("Security issue".into()),
        ..AuthorityDirective::default()
    }]);
    let fx = fixture(StaticProbes::clean(), authority);

    let outcome = fx.reconciler.reconcile_once().await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Locked(LockState::HardLock));

    let record = fx.machine.current_lock_state();
    assert_eq!(record.state, LockState::HardLock);
    assert_eq!(record.lock_type, LockType::Tamper);
    assert_eq!(record.source, LockSource::Remote);
}

#[tokio::test]
async fn identity_mismatch_hard_locks_regardless_of_severity() {
    let mut expected = std::collections::BTreeMap::new();
    expected.insert("fingerprint".to_string(), "other/rom/15:user".to_string());

    // The directive says "unlock" and the device is clean; the mismatch
    // must still win.
    let authority = ScriptedAuthority::new(vec![AuthorityDirective {
        should_be_locked: false,
        expected_identity: Some(expected),
        ..AuthorityDirective::default()
    }]);
    let fx = fixture(StaticProbes::clean(), authority);

    let outcome = fx.reconciler.reconcile_once().await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::IdentityMismatch { ref field } if field == "fingerprint"
    ));
    assert_eq!(fx.machine.state(), LockState::HardLock);
    assert_eq!(fx.machine.current_lock_state().lock_type, LockType::Tamper);
}

#[tokio::test]
async fn snapshot_carries_identity_tamper_and_state() {
    let authority = ScriptedAuthority::new(Vec::new());
    let fx = fixture(
        StaticProbes {
            usb_debugging: true,
            ..StaticProbes::default()
        },
        authority.clone(),
    );

    fx.reconciler.reconcile_once().await.unwrap();

    let requests = authority.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].identity.serial_number, "SN123");
    assert!(requests[0].tamper.usb_debugging);
    assert_eq!(requests[0].lock_state, LockState::Unlocked);
}

#[tokio::test]
async fn queued_alerts_drain_once_back_online() {
    let authority = ScriptedAuthority::offline();
    let probes = StaticProbes {
        rooted: true,
        ..StaticProbes::default()
    };
    let fx = fixture(probes, authority.clone());

    // Offline: the critical tamper locks locally and the alert queues.
    let err = fx.reconciler.reconcile_once().await.unwrap_err();
    assert!(err.is_transient());
    assert_eq!(fx.machine.state(), LockState::HardLock);
    assert!(authority.delivered.lock().unwrap().is_empty());

    // Back online: the next beat delivers the queued alert.
    authority.set_online(true);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    fx.reconciler.reconcile_once().await.unwrap();

    let delivered = authority.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].category, "tamper_alert");
}

#[tokio::test]
async fn boot_round_trip_preserves_record() {
    let dir = tempfile::tempdir().unwrap();
    let original;
    {
        let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
        store.init().unwrap();
        let control = Arc::new(SoftwareDeviceControl::new());
        let machine = LockStateMachine::new(store, control);
        machine
            .apply_hard_lock(
                "identity mismatch on 'serial_number'",
                LockType::Tamper,
                LockSource::Remote,
                true,
            )
            .await
            .unwrap();
        original = machine.current_lock_state();
    }

    // Boot tier read, before any store init.
    let reloaded = ComplianceStateStore::read_boot_record(dir.path(), "device-1").unwrap();
    assert_eq!(reloaded.state, original.state);
    assert_eq!(reloaded.reason, original.reason);
    assert_eq!(reloaded.lock_type, original.lock_type);
    assert_eq!(reloaded.timestamp, original.timestamp);
}

#[tokio::test]
async fn repeated_beats_are_stable_when_in_sync() {
    let authority = ScriptedAuthority::new(Vec::new());
    let fx = fixture(StaticProbes::clean(), authority.clone());

    for _ in 0..3 {
        let outcome = fx.reconciler.reconcile_once().await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InSync);
    }
    assert_eq!(fx.machine.state(), LockState::Unlocked);
    assert!(fx.store.history().is_empty());

    // Sequence numbers are monotonic across beats.
    let requests = authority.requests.lock().unwrap();
    let sequences: Vec<u64> = requests.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}
