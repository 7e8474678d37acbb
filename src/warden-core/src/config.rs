//! Configuration for the compliance agent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the warden agent.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    /// Authority endpoint base URL.
    pub authority_endpoint: String,
    /// API key presented on every agent request.
    pub api_key: String,
    /// Stable device identifier (also derives the state encryption key).
    pub device_id: String,
    /// Directory for durable state.
    pub state_dir: PathBuf,
    /// Heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Local tamper re-check interval.
    pub tamper_interval: Duration,
    /// Network timeout for authority requests.
    pub request_timeout: Duration,
    /// Escalation and classification policy.
    pub policy: PolicyConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            authority_endpoint: "https://devices.sponsa.app".into(),
            api_key: String::new(),
            device_id: "warden-device".into(),
            state_dir: PathBuf::from("/var/lib/warden"),
            heartbeat_interval: Duration::from_secs(180),
            tamper_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            policy: PolicyConfig::default(),
        }
    }
}

/// Escalation thresholds and retry policy.
///
/// The original deployments diverged on thresholds and restriction
/// lists; they are deliberately configuration here, with one canonical
/// default.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Violations of one category tolerated before a hard lock.
    /// Categories absent from `category_thresholds` use
    /// `default_threshold`.
    pub default_threshold: u32,
    /// Per-category threshold overrides.
    pub category_thresholds: HashMap<String, u32>,
    /// Base delay for queue retry backoff.
    pub retry_base: Duration,
    /// Cap for queue retry backoff.
    pub retry_cap: Duration,
}

impl PolicyConfig {
    /// Threshold for a violation category.
    #[must_use]
    pub fn threshold(&self, category: &str) -> u32 {
        self.category_thresholds
            .get(category)
            .copied()
            .unwrap_or(self.default_threshold)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_threshold: 3,
            category_thresholds: HashMap::new(),
            retry_base: Duration::from_secs(30),
            retry_cap: Duration::from_secs(3600),
        }
    }
}
