//! Protocol types exchanged with the remote authority.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lock::LockState;
use crate::tamper::TamperStatus;

/// Identity attributes reported on every heartbeat.
///
/// These are the fields the authority compares against the registration
/// baseline; a mismatch on any of them is a clone/swap signal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable device identifier assigned at registration.
    pub device_id: String,
    /// Hardware serial number.
    #[serde(default)]
    pub serial_number: String,
    /// IMEIs, normalized to a list. WiFi-only devices report the
    /// `NO_IMEI_FOUND` marker.
    #[serde(default)]
    pub imeis: Vec<String>,
    /// Device manufacturer.
    #[serde(default)]
    pub manufacturer: String,
    /// Device model.
    #[serde(default)]
    pub model: String,
    /// OS version string.
    #[serde(default)]
    pub os_version: String,
    /// Build fingerprint.
    #[serde(default)]
    pub fingerprint: String,
}

/// Marker reported instead of an empty IMEI list.
pub const NO_IMEI_MARKER: &str = "NO_IMEI_FOUND";

impl DeviceIdentity {
    /// Normalize the identity for transport: sorted IMEIs, marker for
    /// empty lists.
    pub fn normalize(&mut self) {
        if self.imeis.is_empty() {
            self.imeis.push(NO_IMEI_MARKER.to_string());
        }
        self.imeis.sort();
        self.imeis.dedup();
    }

    /// Look up a field by wire name for expected-identity comparison.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "device_id" => Some(self.device_id.clone()),
            "serial_number" => Some(self.serial_number.clone()),
            "imeis" | "device_imeis" => Some(self.imeis.join(",")),
            "manufacturer" => Some(self.manufacturer.clone()),
            "model" => Some(self.model.clone()),
            "os_version" => Some(self.os_version.clone()),
            "fingerprint" => Some(self.fingerprint.clone()),
            _ => None,
        }
    }
}

/// Compliance snapshot sent to the authority each heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Identity attributes.
    pub identity: DeviceIdentity,
    /// Current tamper snapshot.
    pub tamper: TamperStatus,
    /// Current lock state.
    pub lock_state: LockState,
    /// Agent binary version.
    pub agent_version: String,
    /// Monotonic heartbeat sequence for this process.
    pub sequence: u64,
}

/// Directive returned by the authority.
///
/// Every field defaults: an absent field is "no directive", never an
/// error. An all-default directive is a no-op.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorityDirective {
    /// Whether the device should be locked.
    #[serde(default)]
    pub should_be_locked: bool,
    /// Reason to display and record, if locking.
    #[serde(default)]
    pub block_reason: Option<String>,
    /// Authority's lock-type string (classified locally).
    #[serde(default)]
    pub lock_type: Option<String>,
    /// Free-form instructions (e.g. `DEACTIVATE_NOW`).
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Identity fields the authority expects; any mismatch with local
    /// identity forces a hard lock.
    #[serde(default)]
    pub expected_identity: Option<BTreeMap<String, String>>,
}

impl AuthorityDirective {
    /// Check whether this directive asks for anything at all.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.should_be_locked
            && self.block_reason.is_none()
            && self.lock_type.is_none()
            && self.instructions.is_empty()
            && self.expected_identity.is_none()
    }
}

/// Instruction string the authority uses to request agent removal.
pub const INSTRUCTION_DEACTIVATE: &str = "DEACTIVATE_NOW";
