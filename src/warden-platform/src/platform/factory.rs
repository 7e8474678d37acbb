//! Capability detection and platform factories.
//!
//! The agent never reaches for OS APIs reflectively: it asks this module
//! what the running platform supports and receives trait objects for the
//! rest. Unsupported platforms degrade to the software control, which
//! records every decision without physically enforcing it.

use std::sync::Arc;

use crate::control::DeviceControl;
use crate::error::PlatformError;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
use crate::probes::StaticProbes;
use crate::probes::TamperProbes;
use crate::software::SoftwareDeviceControl;

/// Control capabilities detected at runtime.
#[derive(Debug, Clone)]
pub struct ControlCapabilities {
    /// Whether a privileged device-owner facility is present.
    pub has_device_owner: bool,
    /// Whether lock-task (kiosk) mode can be entered.
    pub supports_lock_task: bool,
    /// Whether packages can be suspended.
    pub supports_package_suspension: bool,
    /// Whether per-feature user restrictions can be set.
    pub supports_user_restrictions: bool,
    /// Whether live tamper signals are available.
    pub has_signal_sources: bool,
}

impl ControlCapabilities {
    /// Check whether hard-lock enforcement is physically meaningful here.
    #[must_use]
    pub fn supports_hard_enforcement(&self) -> bool {
        self.has_device_owner && self.supports_lock_task
    }
}

/// Detect what the current platform can enforce.
pub fn detect_control_capabilities() -> ControlCapabilities {
    #[cfg(target_os = "android")]
    {
        // Device-owner status is granted at provisioning; a managed build
        // carries the full policy surface.
        ControlCapabilities {
            has_device_owner: true,
            supports_lock_task: true,
            supports_package_suspension: true,
            supports_user_restrictions: true,
            has_signal_sources: true,
        }
    }

    #[cfg(all(target_os = "linux", not(target_os = "android")))]
    {
        ControlCapabilities {
            has_device_owner: false,
            supports_lock_task: false,
            supports_package_suspension: false,
            supports_user_restrictions: false,
            has_signal_sources: true,
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        ControlCapabilities {
            has_device_owner: false,
            supports_lock_task: false,
            supports_package_suspension: false,
            supports_user_restrictions: false,
            has_signal_sources: false,
        }
    }
}

/// Create the best available device control for the current platform.
///
/// Falls back to [`SoftwareDeviceControl`] when no privileged facility
/// exists, so lock decisions are still recorded and observable.
pub fn create_platform_control(_alias: &str) -> Result<Arc<dyn DeviceControl>, PlatformError> {
    let caps = detect_control_capabilities();

    tracing::info!(
        has_device_owner = caps.has_device_owner,
        supports_lock_task = caps.supports_lock_task,
        supports_package_suspension = caps.supports_package_suspension,
        "Platform control: detected capabilities"
    );

    if !caps.supports_hard_enforcement() {
        tracing::warn!(
            "Platform control: no device-owner facility, using software control. \
             Lock decisions are recorded but not physically enforced."
        );
    }

    Ok(Arc::new(SoftwareDeviceControl::new()))
}

/// Create the best available tamper probes for the current platform.
pub fn create_platform_probes() -> Arc<dyn TamperProbes> {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        Arc::new(super::linux::SystemProbes::new())
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    {
        tracing::warn!("Platform probes: no signal sources on this platform, using static defaults");
        Arc::new(StaticProbes::clean())
    }
}
