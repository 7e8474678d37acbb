//! Escalation scenarios through the full agent.

use std::sync::Arc;

use warden_core::escalation::categories;
use warden_core::{ComplianceAgent, DeviceIdentity, LockState, LockType, WardenConfig};
use warden_platform::{SoftwareDeviceControl, StaticProbes};

use crate::support::ScriptedAuthority;

async fn start_agent(
    dir: &tempfile::TempDir,
    authority: Arc<ScriptedAuthority>,
) -> ComplianceAgent {
    let config = WardenConfig {
        device_id: "device-1".into(),
        state_dir: dir.path().to_path_buf(),
        ..WardenConfig::default()
    };
    let identity = DeviceIdentity {
        device_id: "device-1".into(),
        ..DeviceIdentity::default()
    };
    ComplianceAgent::start_with_authority(
        config,
        identity,
        Arc::new(SoftwareDeviceControl::new()),
        Arc::new(StaticProbes::clean()),
        authority,
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn three_uninstall_attempts_hard_lock_with_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let agent = start_agent(&dir, ScriptedAuthority::offline()).await;
    let handle = agent.handle();

    // threshold - 1 events leave the state unchanged.
    for _ in 0..2 {
        let decision = handle
            .report_violation(categories::UNINSTALL_ATTEMPT)
            .await
            .unwrap();
        assert!(!decision.should_lock_hard);
    }
    assert_eq!(handle.current_state(), LockState::Unlocked);

    // The threshold event escalates.
    let decision = handle
        .report_violation(categories::UNINSTALL_ATTEMPT)
        .await
        .unwrap();
    assert_eq!(decision.count, 3);
    assert!(decision.should_lock_hard);

    let notice = handle.subscribe().borrow().clone();
    assert_eq!(notice.state, LockState::HardLock);
    assert_eq!(notice.lock_type, LockType::ComplianceViolation);

    agent.stop().await.unwrap();

    // Exactly one lock record was created for the whole ladder, and it
    // survives in the boot tier.
    let record =
        warden_core::store::ComplianceStateStore::read_boot_record(dir.path(), "device-1").unwrap();
    assert_eq!(record.state, LockState::HardLock);
    assert_eq!(record.lock_type, LockType::ComplianceViolation);

    let store = warden_core::store::ComplianceStateStore::new("device-1", dir.path());
    store.init().unwrap();
    assert_eq!(store.history().len(), 1);
}

#[tokio::test]
async fn escalation_count_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let agent = start_agent(&dir, ScriptedAuthority::offline()).await;
        let handle = agent.handle();
        handle
            .report_violation(categories::ADMIN_DISABLE_ATTEMPT)
            .await
            .unwrap();
        handle
            .report_violation(categories::ADMIN_DISABLE_ATTEMPT)
            .await
            .unwrap();
        agent.stop().await.unwrap();
    }

    // A reboot between violations must not reset the ladder.
    let agent = start_agent(&dir, ScriptedAuthority::offline()).await;
    let handle = agent.handle();
    let decision = handle
        .report_violation(categories::ADMIN_DISABLE_ATTEMPT)
        .await
        .unwrap();
    assert_eq!(decision.count, 3);
    assert!(decision.should_lock_hard);
    assert_eq!(handle.current_state(), LockState::HardLock);

    agent.stop().await.unwrap();
}

#[tokio::test]
async fn hard_lock_survives_agent_restart() {
    let dir = tempfile::tempdir().unwrap();

    {
        let agent = start_agent(&dir, ScriptedAuthority::offline()).await;
        let handle = agent.handle();
        for _ in 0..3 {
            handle
                .report_violation(categories::UNINSTALL_ATTEMPT)
                .await
                .unwrap();
        }
        assert_eq!(handle.current_state(), LockState::HardLock);
        agent.stop().await.unwrap();
    }

    // Boot recovery re-applies the persisted hard lock.
    let agent = start_agent(&dir, ScriptedAuthority::offline()).await;
    assert_eq!(agent.handle().current_state(), LockState::HardLock);
    agent.stop().await.unwrap();
}

#[tokio::test]
async fn unlock_directive_clears_escalation_lock_but_not_counter() {
    let dir = tempfile::tempdir().unwrap();
    let authority = ScriptedAuthority::new(Vec::new());
    let agent = start_agent(&dir, authority.clone()).await;
    let handle = agent.handle();

    for _ in 0..3 {
        handle
            .report_violation(categories::UNINSTALL_ATTEMPT)
            .await
            .unwrap();
    }
    assert_eq!(handle.current_state(), LockState::HardLock);

    // Authority clears the lock on the next beat.
    handle.trigger_heartbeat().await.unwrap();
    handle.request_unlock().await.unwrap();
    assert_eq!(handle.current_state(), LockState::Unlocked);

    // The counter is untouched: the next violation escalates again
    // immediately (no automatic reset).
    let decision = handle
        .report_violation(categories::UNINSTALL_ATTEMPT)
        .await
        .unwrap();
    assert_eq!(decision.count, 4);
    assert!(decision.should_lock_hard);

    agent.stop().await.unwrap();
}
