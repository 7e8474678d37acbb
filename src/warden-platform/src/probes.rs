//! Raw tamper-signal probes.
//!
//! Each probe answers one boolean question about the device. Probes are
//! intentionally independent: the detector in the core evaluates every
//! probe even when some fail, so a single broken check can never mask the
//! others.

use crate::error::PlatformError;

/// One boolean tamper signal per method.
///
/// Implementations must not cache across calls; the detector snapshots
/// on demand and a stale answer defeats the re-check loop.
pub trait TamperProbes: Send + Sync {
    /// Root/superuser access indicators.
    fn rooted(&self) -> Result<bool, PlatformError>;

    /// USB debugging enabled.
    fn usb_debugging(&self) -> Result<bool, PlatformError>;

    /// Developer mode enabled.
    fn developer_mode(&self) -> Result<bool, PlatformError>;

    /// Bootloader unlocked / verified boot not enforced.
    fn bootloader_unlocked(&self) -> Result<bool, PlatformError>;

    /// Running a non-factory OS build.
    fn custom_rom(&self) -> Result<bool, PlatformError>;
}

/// Fixed-answer probes for tests and platforms with no signal sources.
#[derive(Debug, Clone, Default)]
pub struct StaticProbes {
    /// Answer for [`TamperProbes::rooted`].
    pub rooted: bool,
    /// Answer for [`TamperProbes::usb_debugging`].
    pub usb_debugging: bool,
    /// Answer for [`TamperProbes::developer_mode`].
    pub developer_mode: bool,
    /// Answer for [`TamperProbes::bootloader_unlocked`].
    pub bootloader_unlocked: bool,
    /// Answer for [`TamperProbes::custom_rom`].
    pub custom_rom: bool,
    /// Probes (by name) that should error instead of answering.
    pub failing: Vec<&'static str>,
}

impl StaticProbes {
    /// All-clear probe set.
    pub fn clean() -> Self {
        Self::default()
    }

    fn answer(&self, probe: &'static str, value: bool) -> Result<bool, PlatformError> {
        if self.failing.contains(&probe) {
            return Err(PlatformError::ProbeFailed {
                probe: probe.to_string(),
                message: "probe unavailable".to_string(),
            });
        }
        Ok(value)
    }
}

impl TamperProbes for StaticProbes {
    fn rooted(&self) -> Result<bool, PlatformError> {
        self.answer("rooted", self.rooted)
    }

    fn usb_debugging(&self) -> Result<bool, PlatformError> {
        self.answer("usb_debugging", self.usb_debugging)
    }

    fn developer_mode(&self) -> Result<bool, PlatformError> {
        self.answer("developer_mode", self.developer_mode)
    }

    fn bootloader_unlocked(&self) -> Result<bool, PlatformError> {
        self.answer("bootloader_unlocked", self.bootloader_unlocked)
    }

    fn custom_rom(&self) -> Result<bool, PlatformError> {
        self.answer("custom_rom", self.custom_rom)
    }
}
