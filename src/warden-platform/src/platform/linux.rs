//! Tamper probes backed by Linux/Android system state.
//!
//! Signal sources:
//! - su binaries and root-management packages on well-known paths
//! - global settings and boot properties for debugging/developer flags
//! - `ro.boot.flash.locked` / `ro.boot.verifiedbootstate` for bootloader
//!   state (green/yellow = locked, orange/red = unlocked)
//! - build tags and OTA certificates for non-factory ROM detection
//!
//! Every probe degrades to an error rather than guessing: the detector
//! upstream maps probe errors to "indicator absent" and logs them.

use std::path::Path;

use crate::error::PlatformError;
use crate::probes::TamperProbes;

/// Paths where su binaries or root managers land.
const SU_PATHS: &[&str] = &[
    "/system/bin/su",
    "/system/xbin/su",
    "/sbin/su",
    "/su/bin/su",
    "/system/app/Superuser.apk",
    "/data/adb/magisk",
];

/// Build tags that only appear on non-factory images.
const CUSTOM_BUILD_TAGS: &[&str] = &["test-keys", "dev-keys"];

/// Probes reading live system state.
pub struct SystemProbes {
    /// Root of the properties tree, overridable for tests.
    property_root: &'static str,
}

impl SystemProbes {
    /// Create probes against the real system.
    pub fn new() -> Self {
        Self {
            property_root: "/",
        }
    }

    /// Read a boot/system property by name.
    ///
    /// Properties are exposed as small files under the property tree on
    /// managed builds; absence is reported as an error so the caller can
    /// distinguish "not set" from "cannot check".
    fn read_property(&self, name: &str) -> Result<String, PlatformError> {
        let path = Path::new(self.property_root)
            .join("proc/device-tree/firmware/android/properties")
            .join(name);

        std::fs::read_to_string(&path)
            .map(|v| v.trim_end_matches('\0').trim().to_string())
            .map_err(|e| PlatformError::ProbeFailed {
                probe: name.to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for SystemProbes {
    fn default() -> Self {
        Self::new()
    }
}

impl TamperProbes for SystemProbes {
    fn rooted(&self) -> Result<bool, PlatformError> {
        for path in SU_PATHS {
            if Path::new(path).exists() {
                tracing::warn!(path = %path, "SystemProbes: su indicator present");
                return Ok(true);
            }
        }

        // A writable /system is a root indicator even without a su binary.
        let system_writable = std::fs::metadata("/system")
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false);
        if system_writable {
            // Read-only bind mounts report writable metadata on some
            // kernels; confirm with an actual mount-flag check.
            if let Ok(mounts) = std::fs::read_to_string("/proc/mounts") {
                for line in mounts.lines() {
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if fields.get(1) == Some(&"/system")
                        && fields.get(3).is_some_and(|opts| opts.contains("rw"))
                    {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    fn usb_debugging(&self) -> Result<bool, PlatformError> {
        match self.read_property("init.svc.adbd") {
            Ok(state) => Ok(state == "running"),
            Err(_) => {
                // Fall back to the adb socket.
                Ok(Path::new("/dev/socket/adbd").exists())
            },
        }
    }

    fn developer_mode(&self) -> Result<bool, PlatformError> {
        let value = self.read_property("persist.sys.developer_options")?;
        Ok(value == "1" || value.eq_ignore_ascii_case("true"))
    }

    fn bootloader_unlocked(&self) -> Result<bool, PlatformError> {
        if let Ok(state) = self.read_property("ro.boot.verifiedbootstate") {
            // green/yellow = verified chain intact; orange/red = unlocked
            // or tampered.
            return Ok(state == "orange" || state == "red");
        }

        let flash_locked = self.read_property("ro.boot.flash.locked")?;
        Ok(flash_locked == "0")
    }

    fn custom_rom(&self) -> Result<bool, PlatformError> {
        let tags = self.read_property("ro.build.tags")?;
        Ok(CUSTOM_BUILD_TAGS.iter().any(|t| tags.contains(t)))
    }
}
