//! Restriction sets and enforcement outcomes.

use serde::{Deserialize, Serialize};

/// A single enforceable device restriction.
///
/// This is the complete, fixed vocabulary of restrictions the agent can
/// apply. Enforcement profiles are subsets of this set, and
/// `clear_all_restrictions` must reverse exactly the subset that was
/// applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    /// Pin the device into a single-surface kiosk task.
    LockTaskMode,
    /// Suspend all packages outside the protected allow-list.
    PackageSuspension,
    /// Disable status bar expansion and quick settings.
    StatusBarDisabled,
    /// Disable keyguard shortcuts that bypass the lock surface.
    KeyguardBypassDisabled,
    /// Disable the camera.
    CameraDisabled,
    /// Block rebooting into safe mode.
    NoSafeBoot,
    /// Block factory reset from settings or recovery.
    NoFactoryReset,
    /// Block Wi-Fi configuration changes.
    NoWifiConfig,
    /// Block Bluetooth configuration changes.
    NoBluetoothConfig,
    /// Block installing applications.
    NoAppInstall,
    /// Block uninstalling applications.
    NoAppUninstall,
    /// Block adding or removing accounts.
    NoAccountModification,
    /// Block force-stopping the agent package.
    NoForceStop,
    /// Block access to critical settings screens.
    NoCriticalSettings,
}

impl Restriction {
    /// Stable identifier used in logs and partial-result reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::LockTaskMode => "lock_task_mode",
            Self::PackageSuspension => "package_suspension",
            Self::StatusBarDisabled => "status_bar_disabled",
            Self::KeyguardBypassDisabled => "keyguard_bypass_disabled",
            Self::CameraDisabled => "camera_disabled",
            Self::NoSafeBoot => "no_safe_boot",
            Self::NoFactoryReset => "no_factory_reset",
            Self::NoWifiConfig => "no_wifi_config",
            Self::NoBluetoothConfig => "no_bluetooth_config",
            Self::NoAppInstall => "no_app_install",
            Self::NoAppUninstall => "no_app_uninstall",
            Self::NoAccountModification => "no_account_modification",
            Self::NoForceStop => "no_force_stop",
            Self::NoCriticalSettings => "no_critical_settings",
        }
    }
}

/// The fully-restricted profile applied by a hard lock.
///
/// Order matters: steps are attempted in this order, best-effort, and the
/// immediate screen lock is issued after the last step regardless of
/// earlier failures.
pub const HARD_PROFILE: &[Restriction] = &[
    Restriction::LockTaskMode,
    Restriction::PackageSuspension,
    Restriction::StatusBarDisabled,
    Restriction::KeyguardBypassDisabled,
    Restriction::CameraDisabled,
    Restriction::NoSafeBoot,
    Restriction::NoFactoryReset,
    Restriction::NoWifiConfig,
    Restriction::NoBluetoothConfig,
    Restriction::NoAppInstall,
    Restriction::NoAppUninstall,
    Restriction::NoAccountModification,
];

/// The restricted-but-usable profile applied by a soft lock.
pub const SOFT_PROFILE: &[Restriction] = &[
    Restriction::NoAppUninstall,
    Restriction::NoForceStop,
    Restriction::NoCriticalSettings,
];

/// Package prefixes that must never be suspended.
///
/// Suspending the input method, telephony stack, or system UI makes the
/// device uncontrollable, including by us.
pub const PROTECTED_PACKAGE_PREFIXES: &[&str] = &[
    "com.android.inputmethod",
    "com.google.android.inputmethod",
    "com.android.phone",
    "com.android.server.telecom",
    "com.android.systemui",
];

/// Which enforcement profile a control operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnforcementProfile {
    /// Kiosk-style full restriction.
    Hard,
    /// Warned-but-usable restriction.
    Soft,
}

impl EnforcementProfile {
    /// The restriction set this profile applies.
    #[must_use]
    pub fn restrictions(&self) -> &'static [Restriction] {
        match self {
            Self::Hard => HARD_PROFILE,
            Self::Soft => SOFT_PROFILE,
        }
    }
}

/// A failed enforcement step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailure {
    /// The restriction that could not be applied or cleared.
    pub restriction: Restriction,
    /// Why the step failed.
    pub message: String,
}

/// Outcome of a multi-step enforcement operation.
///
/// A failure in step *k* never aborts steps *k+1..n*; the result reports
/// exactly which steps succeeded and which did not. Partial failure is
/// recorded for audit, never escalated to the caller as fatal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialResult {
    /// Restrictions that were applied (or cleared) successfully.
    pub applied: Vec<Restriction>,
    /// Steps that failed, with reasons.
    pub failed: Vec<StepFailure>,
}

impl PartialResult {
    /// Record a successful step.
    pub fn ok(&mut self, restriction: Restriction) {
        self.applied.push(restriction);
    }

    /// Record a failed step.
    pub fn fail(&mut self, restriction: Restriction, message: impl Into<String>) {
        self.failed.push(StepFailure {
            restriction,
            message: message.into(),
        });
    }

    /// Check whether every step succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Names of the failed steps, for structured logging.
    #[must_use]
    pub fn failed_names(&self) -> Vec<&'static str> {
        self.failed.iter().map(|f| f.restriction.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_are_disjoint_enough() {
        // The soft profile must not contain kiosk-grade restrictions.
        assert!(!SOFT_PROFILE.contains(&Restriction::LockTaskMode));
        assert!(!SOFT_PROFILE.contains(&Restriction::PackageSuspension));
    }

    #[test]
    fn test_hard_profile_covers_user_restrictions() {
        for r in [
            Restriction::NoSafeBoot,
            Restriction::NoFactoryReset,
            Restriction::NoWifiConfig,
            Restriction::NoBluetoothConfig,
            Restriction::NoAppInstall,
            Restriction::NoAppUninstall,
            Restriction::NoAccountModification,
        ] {
            assert!(HARD_PROFILE.contains(&r), "hard profile missing {:?}", r);
        }
    }

    #[test]
    fn test_partial_result_reports_failures() {
        let mut result = PartialResult::default();
        result.ok(Restriction::CameraDisabled);
        result.fail(Restriction::LockTaskMode, "not permitted");

        assert!(!result.is_complete());
        assert_eq!(result.applied.len(), 1);
        assert_eq!(result.failed_names(), vec!["lock_task_mode"]);
    }
}
