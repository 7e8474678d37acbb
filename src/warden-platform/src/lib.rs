//! # warden-platform
//!
//! Platform boundary for the warden compliance agent: the privileged
//! Device Control Capability that physically restricts a managed device,
//! and the raw tamper-signal probes the detector aggregates.
//!
//! ## Platform Support
//!
//! | Platform | Control backend | Signal probes |
//! |----------|-----------------|---------------|
//! | Android  | Device-owner policy APIs (out of tree) | system properties, su paths |
//! | Linux    | Software profile (session lock) | /proc, boot properties |
//! | Fallback | Software profile (in-memory) | static defaults |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use warden_platform::{create_platform_control, detect_control_capabilities};
//!
//! let caps = detect_control_capabilities();
//! let control = create_platform_control("warden")?;
//! let outcome = control.enforce_hard_profile("payment overdue").await;
//! ```
//!
//! The control trait is versioned through [`ControlCapabilities`]: callers
//! feature-detect what the running platform supports instead of probing
//! OS APIs reflectively.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)] // Too strict for production code
#![allow(clippy::missing_errors_doc)] // Error documentation not required
#![allow(clippy::module_name_repetitions)] // Allow Type in module::Type
#![allow(clippy::must_use_candidate)] // Not all functions need must_use

mod control;
mod error;
mod probes;
mod software;
mod types;

/// Platform-specific probe and capability detection.
pub mod platform;

pub use control::DeviceControl;
pub use error::PlatformError;
pub use probes::{StaticProbes, TamperProbes};
pub use software::SoftwareDeviceControl;
pub use types::{
    EnforcementProfile, PartialResult, Restriction, StepFailure, HARD_PROFILE,
    PROTECTED_PACKAGE_PREFIXES, SOFT_PROFILE,
};

pub use platform::{
    create_platform_control, create_platform_probes, detect_control_capabilities,
    ControlCapabilities,
};
