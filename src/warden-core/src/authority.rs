//! HTTP client for the remote authority.
//!
//! One authenticated request/response channel: the agent posts heartbeat
//! snapshots and queued alerts, the authority answers with directives.
//! Every request carries the device-agent API key header and a bounded
//! timeout; a timeout is indistinguishable from any other transport
//! failure and is handled by the next scheduled cycle, never retried
//! inline.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, info, instrument, warn};

use crate::error::WardenError;
use crate::queue::QueuedCommand;
use crate::types::{AuthorityDirective, HeartbeatRequest};

/// Header carrying the device-agent API key.
pub const API_KEY_HEADER: &str = "X-Device-Api-Key";

/// The authority channel as the reconciler sees it.
///
/// Abstracted behind a trait so reconciliation logic is testable with a
/// scripted authority.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Post a compliance snapshot; returns the authority's directive.
    async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<AuthorityDirective, WardenError>;

    /// Deliver one queued alert/event.
    async fn deliver(&self, command: &QueuedCommand) -> Result<(), WardenError>;
}

/// HTTPS client for the device-management API.
pub struct AuthorityClient {
    client: Client,
    base_url: String,
    api_key: String,
    device_id: String,
}

impl AuthorityClient {
    /// Create a new client.
    ///
    /// Connect/read timeouts are deliberately aggressive: a hung TCP
    /// connection must not stall the heartbeat loop.
    pub fn new(
        base_url: &str,
        api_key: &str,
        device_id: &str,
        timeout: Duration,
    ) -> Result<Self, WardenError> {
        let connect_timeout = Duration::from_secs(3);
        let read_timeout = timeout.min(Duration::from_secs(10));

        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .pool_idle_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(1)
            .tcp_nodelay(true)
            .user_agent(format!("warden/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WardenError::Config {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            device_id: device_id.to_string(),
        })
    }
}

#[async_trait]
impl Authority for AuthorityClient {
    #[instrument(skip(self, request), fields(device_id = %self.device_id, sequence = request.sequence))]
    async fn heartbeat(&self, request: &HeartbeatRequest) -> Result<AuthorityDirective, WardenError> {
        let url = format!("{}/api/devices/{}/heartbeat", self.base_url, self.device_id);
        debug!(url = %url, "Authority: posting heartbeat");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Authority: heartbeat request failed");
                WardenError::Transport {
                    message: format!("heartbeat to {url} failed: {e}"),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Authority: non-success heartbeat status");
            return Err(WardenError::Transport {
                message: format!("HTTP {status} from {url}"),
            });
        }

        let directive = response
            .json::<AuthorityDirective>()
            .await
            .map_err(|e| WardenError::Transport {
                message: format!("failed to parse directive from {url}: {e}"),
            })?;

        info!(
            should_be_locked = directive.should_be_locked,
            lock_type = ?directive.lock_type,
            instructions = directive.instructions.len(),
            "Authority: directive received"
        );
        Ok(directive)
    }

    #[instrument(skip(self, command), fields(device_id = %self.device_id, command_id = %command.id))]
    async fn deliver(&self, command: &QueuedCommand) -> Result<(), WardenError> {
        let url = format!("{}/api/devices/{}/alerts", self.base_url, self.device_id);
        debug!(url = %url, category = %command.category, "Authority: delivering queued alert");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(command)
            .send()
            .await
            .map_err(|e| WardenError::Transport {
                message: format!("alert delivery to {url} failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WardenError::Transport {
                message: format!("HTTP {status} from {url}"),
            });
        }

        Ok(())
    }
}
