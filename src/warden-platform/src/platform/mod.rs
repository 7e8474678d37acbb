//! Platform detection and control/probe factories.

mod factory;
#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;

pub use factory::{
    create_platform_control, create_platform_probes, detect_control_capabilities,
    ControlCapabilities,
};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::SystemProbes;
