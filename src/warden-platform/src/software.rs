//! Software device control implementation.
//!
//! Tracks the applied restriction set in memory without touching any
//! platform policy API.
//!
//! Use only for:
//! - Development and testing
//! - Desktop platforms where no device-owner facility exists
//! - CI environments
//!
//! The failure-injection hooks let tests exercise partial-enforcement
//! paths the same way the real platform produces them.

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::control::DeviceControl;
use crate::error::PlatformError;
use crate::types::{EnforcementProfile, PartialResult, Restriction};

/// In-memory device control for development and fallback scenarios.
pub struct SoftwareDeviceControl {
    /// Restrictions currently applied, in application order.
    applied: RwLock<Vec<Restriction>>,
    /// Restrictions that should fail when attempted (test hook).
    failing: Mutex<HashSet<Restriction>>,
    /// Whether management authority is simulated as active.
    management_active: RwLock<bool>,
    /// Count of immediate-lock calls (observable by tests).
    immediate_locks: Mutex<u32>,
}

impl SoftwareDeviceControl {
    /// Create a new software control with management active.
    pub fn new() -> Self {
        info!("SoftwareDeviceControl: no platform policy backend, tracking in memory");
        Self {
            applied: RwLock::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            management_active: RwLock::new(true),
            immediate_locks: Mutex::new(0),
        }
    }

    /// Make a specific restriction step fail on the next attempts.
    pub fn inject_failure(&self, restriction: Restriction) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(restriction);
        }
    }

    /// Simulate management authority being revoked or restored.
    pub fn set_management_active(&self, active: bool) {
        if let Ok(mut flag) = self.management_active.write() {
            *flag = active;
        }
    }

    /// Number of immediate screen locks issued so far.
    pub fn immediate_lock_count(&self) -> u32 {
        self.immediate_locks.lock().map(|c| *c).unwrap_or(0)
    }

    fn apply_profile(&self, profile: EnforcementProfile, reason: &str) -> PartialResult {
        let mut result = PartialResult::default();
        let failing = self
            .failing
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();

        let mut applied = match self.applied.write() {
            Ok(a) => a,
            Err(_) => {
                warn!("SoftwareDeviceControl: state lock poisoned, skipping profile");
                return result;
            },
        };

        for &restriction in profile.restrictions() {
            if failing.contains(&restriction) {
                warn!(
                    restriction = restriction.name(),
                    reason = %reason,
                    "SoftwareDeviceControl: injected failure"
                );
                result.fail(restriction, "injected failure");
                continue;
            }
            if !applied.contains(&restriction) {
                applied.push(restriction);
            }
            result.ok(restriction);
        }

        result
    }
}

impl Default for SoftwareDeviceControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceControl for SoftwareDeviceControl {
    async fn enforce_hard_profile(&self, reason: &str) -> PartialResult {
        info!(reason = %reason, "SoftwareDeviceControl: applying hard profile");
        self.apply_profile(EnforcementProfile::Hard, reason)
    }

    async fn enforce_soft_profile(&self, reason: &str) -> PartialResult {
        info!(reason = %reason, "SoftwareDeviceControl: applying soft profile");
        self.apply_profile(EnforcementProfile::Soft, reason)
    }

    async fn clear_all_restrictions(&self) -> PartialResult {
        let mut result = PartialResult::default();
        let failing = self
            .failing
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default();

        if let Ok(mut applied) = self.applied.write() {
            let mut remaining = Vec::new();
            for restriction in applied.drain(..) {
                if failing.contains(&restriction) {
                    result.fail(restriction, "injected failure");
                    remaining.push(restriction);
                } else {
                    result.ok(restriction);
                }
            }
            *applied = remaining;
        }

        info!(
            cleared = result.applied.len(),
            failed = result.failed.len(),
            "SoftwareDeviceControl: cleared restrictions"
        );
        result
    }

    async fn issue_immediate_lock(&self) -> Result<(), PlatformError> {
        if let Ok(mut count) = self.immediate_locks.lock() {
            *count += 1;
        }
        Ok(())
    }

    fn is_management_active(&self) -> bool {
        self.management_active.read().map(|f| *f).unwrap_or(false)
    }

    fn active_restrictions(&self) -> Vec<Restriction> {
        self.applied.read().map(|a| a.clone()).unwrap_or_default()
    }
}
