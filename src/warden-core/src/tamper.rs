//! Tamper signal aggregation.
//!
//! The detector turns the platform's independent boolean probes into one
//! complete [`TamperStatus`] snapshot with a severity classification.
//! Snapshots are never partially updated: every call re-evaluates every
//! probe and returns a fresh value.
//!
//! ## Failure semantics
//!
//! A probe that errors degrades to "indicator not present" and is logged;
//! it can never prevent the other probes from being evaluated. The
//! degraded probe is recorded in the indicator set as
//! `<name>_unavailable` so audit can distinguish "clean" from "blind".

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use warden_platform::{PlatformError, TamperProbes};

/// Overall tamper severity, a pure function of which indicators are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TamperSeverity {
    /// No indicators.
    None,
    /// Reserved for wire compatibility; the mapping never produces it.
    Low,
    /// Exactly one non-critical indicator.
    Medium,
    /// Two or more non-critical indicators.
    High,
    /// Any critical indicator (root, custom ROM, unlocked bootloader).
    Critical,
}

/// A complete snapshot of the device's tamper indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperStatus {
    /// Root/superuser access detected.
    pub rooted: bool,
    /// USB debugging enabled.
    pub usb_debugging: bool,
    /// Developer mode enabled.
    pub developer_mode: bool,
    /// Bootloader unlocked.
    pub bootloader_unlocked: bool,
    /// Non-factory OS build.
    pub custom_rom: bool,
    /// Severity classification of the snapshot.
    pub severity: TamperSeverity,
    /// Names of the indicators that are set, plus `_unavailable` markers
    /// for probes that could not be evaluated.
    pub indicators: BTreeSet<String>,
}

impl TamperStatus {
    /// An all-clear snapshot.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            rooted: false,
            usb_debugging: false,
            developer_mode: false,
            bootloader_unlocked: false,
            custom_rom: false,
            severity: TamperSeverity::None,
            indicators: BTreeSet::new(),
        }
    }

    /// Check whether any indicator is set.
    #[must_use]
    pub fn is_tampered(&self) -> bool {
        self.severity > TamperSeverity::None
    }
}

/// Classify a set of indicators into a severity.
///
/// Fixed total order: `Critical` if any of {rooted, custom_rom,
/// bootloader_unlocked}; else `High` if two or more of the remaining
/// indicators are set; else `Medium` if exactly one; else `None`.
#[must_use]
pub fn classify_severity(
    rooted: bool,
    usb_debugging: bool,
    developer_mode: bool,
    bootloader_unlocked: bool,
    custom_rom: bool,
) -> TamperSeverity {
    if rooted || custom_rom || bootloader_unlocked {
        return TamperSeverity::Critical;
    }

    match [usb_debugging, developer_mode]
        .iter()
        .filter(|&&set| set)
        .count()
    {
        0 => TamperSeverity::None,
        1 => TamperSeverity::Medium,
        _ => TamperSeverity::High,
    }
}

/// Aggregates platform probes into tamper snapshots.
pub struct TamperDetector {
    probes: Arc<dyn TamperProbes>,
}

impl TamperDetector {
    /// Create a detector over the given probes.
    pub fn new(probes: Arc<dyn TamperProbes>) -> Self {
        Self { probes }
    }

    /// Evaluate every probe and produce a complete snapshot.
    pub fn evaluate(&self) -> TamperStatus {
        let mut indicators = BTreeSet::new();

        let rooted = self.probe("rooted", &mut indicators, |p| p.rooted());
        let usb_debugging = self.probe("usb_debugging", &mut indicators, |p| p.usb_debugging());
        let developer_mode = self.probe("developer_mode", &mut indicators, |p| p.developer_mode());
        let bootloader_unlocked =
            self.probe("bootloader_unlocked", &mut indicators, |p| {
                p.bootloader_unlocked()
            });
        let custom_rom = self.probe("custom_rom", &mut indicators, |p| p.custom_rom());

        let severity = classify_severity(
            rooted,
            usb_debugging,
            developer_mode,
            bootloader_unlocked,
            custom_rom,
        );

        debug!(
            severity = ?severity,
            indicators = ?indicators,
            "TamperDetector: snapshot complete"
        );

        TamperStatus {
            rooted,
            usb_debugging,
            developer_mode,
            bootloader_unlocked,
            custom_rom,
            severity,
            indicators,
        }
    }

    /// Evaluate one probe with degradation on failure.
    fn probe<F>(&self, name: &str, indicators: &mut BTreeSet<String>, check: F) -> bool
    where
        F: FnOnce(&dyn TamperProbes) -> Result<bool, PlatformError>,
    {
        match check(self.probes.as_ref()) {
            Ok(true) => {
                indicators.insert(name.to_string());
                true
            },
            Ok(false) => false,
            Err(e) => {
                warn!(
                    probe = %name,
                    error = %e,
                    "TamperDetector: probe failed, treating indicator as absent"
                );
                indicators.insert(format!("{name}_unavailable"));
                false
            },
        }
    }
}
