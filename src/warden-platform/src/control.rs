//! Device control capability trait.
//!
//! This is the privileged boundary: implementations own the platform
//! policy APIs that physically restrict the device. The core never calls
//! those APIs directly; it speaks this trait and treats every operation
//! as best-effort.

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::types::{PartialResult, Restriction};

/// Privileged facility for enforcing device-wide restrictions.
///
/// All profile operations are best-effort: a failing step is reported in
/// the [`PartialResult`] and never aborts the remaining steps. Callers
/// persist their own state *before* invoking enforcement so a crash
/// mid-profile resumes correctly.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Apply the fully-restricted (kiosk) profile.
    ///
    /// Implementations must attempt every step in the profile even when
    /// earlier steps fail; the caller issues the terminal screen lock
    /// separately.
    async fn enforce_hard_profile(&self, reason: &str) -> PartialResult;

    /// Apply the restricted-but-usable profile.
    async fn enforce_soft_profile(&self, reason: &str) -> PartialResult;

    /// Reverse every restriction previously applied.
    ///
    /// The cleared set must be exactly the applied set: clearing a
    /// restriction that was never applied, or leaving one behind, leaves
    /// the device in a partially-restricted limbo.
    async fn clear_all_restrictions(&self) -> PartialResult;

    /// Lock the screen right now.
    async fn issue_immediate_lock(&self) -> Result<(), PlatformError>;

    /// Check whether this agent still holds management authority.
    fn is_management_active(&self) -> bool;

    /// The restrictions currently applied, in application order.
    fn active_restrictions(&self) -> Vec<Restriction>;
}
