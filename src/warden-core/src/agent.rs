//! The compliance agent: one single-writer actor plus periodic drivers.
//!
//! The actor task owns every state transition; heartbeat and tamper
//! re-check run as independent interval tasks that send ticks into the
//! actor's channel. Event-driven triggers (violation reports, push
//! directives, unlock requests) enqueue commands the same way and can
//! arrive concurrently with a heartbeat in flight; the channel
//! serializes them.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use warden_platform::{DeviceControl, TamperProbes};

use crate::authority::{Authority, AuthorityClient};
use crate::config::WardenConfig;
use crate::error::WardenError;
use crate::escalation::{EscalationDecision, EscalationTracker};
use crate::heartbeat::HeartbeatReconciler;
use crate::lock::{LockNotice, LockSource, LockState, LockType};
use crate::machine::LockStateMachine;
use crate::queue::OfflineCommandQueue;
use crate::store::ComplianceStateStore;
use crate::tamper::TamperDetector;
use crate::types::{AuthorityDirective, DeviceIdentity};

/// Queue category for violation alerts.
const ALERT_CATEGORY_VIOLATION: &str = "violation_alert";

/// Commands processed by the actor, one at a time.
enum AgentCommand {
    ReportViolation {
        category: String,
        reply: oneshot::Sender<EscalationDecision>,
    },
    ApplyDirective(AuthorityDirective),
    Unlock {
        reply: oneshot::Sender<Result<(), WardenError>>,
    },
    ResetEscalation {
        category: String,
    },
    SetSkipEnforcement(bool),
    HeartbeatTick,
    TamperTick,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle for interacting with a running agent.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentCommand>,
    notices: watch::Receiver<LockNotice>,
}

impl AgentHandle {
    /// Report a local violation (uninstall attempt, admin disable, ...).
    ///
    /// Returns the escalation decision after the durable increment.
    pub async fn report_violation(&self, category: &str) -> Result<EscalationDecision, WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::ReportViolation {
                category: category.to_string(),
                reply,
            })
            .await
            .map_err(|_| WardenError::AgentStopped)?;
        rx.await.map_err(|_| WardenError::AgentStopped)
    }

    /// Apply a push-delivered authority directive.
    pub async fn push_directive(&self, directive: AuthorityDirective) -> Result<(), WardenError> {
        self.tx
            .send(AgentCommand::ApplyDirective(directive))
            .await
            .map_err(|_| WardenError::AgentStopped)
    }

    /// Request an unlock through the authorized path.
    pub async fn request_unlock(&self) -> Result<(), WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::Unlock { reply })
            .await
            .map_err(|_| WardenError::AgentStopped)?;
        rx.await.map_err(|_| WardenError::AgentStopped)?
    }

    /// Administrator-only: reset an escalation counter.
    pub async fn reset_escalation(&self, category: &str) -> Result<(), WardenError> {
        self.tx
            .send(AgentCommand::ResetEscalation {
                category: category.to_string(),
            })
            .await
            .map_err(|_| WardenError::AgentStopped)
    }

    /// Suppress or restore enforcement during registration.
    pub async fn set_skip_enforcement(&self, skip: bool) -> Result<(), WardenError> {
        self.tx
            .send(AgentCommand::SetSkipEnforcement(skip))
            .await
            .map_err(|_| WardenError::AgentStopped)
    }

    /// Trigger an immediate heartbeat cycle (out of schedule).
    pub async fn trigger_heartbeat(&self) -> Result<(), WardenError> {
        self.tx
            .send(AgentCommand::HeartbeatTick)
            .await
            .map_err(|_| WardenError::AgentStopped)
    }

    /// Subscribe to lock transition notices.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LockNotice> {
        self.notices.clone()
    }

    /// The current lock state from the latest notice.
    #[must_use]
    pub fn current_state(&self) -> LockState {
        self.notices.borrow().state
    }

    /// Stop the agent and flush durable state.
    pub async fn shutdown(self) -> Result<(), WardenError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(AgentCommand::Shutdown { reply })
            .await
            .map_err(|_| WardenError::AgentStopped)?;
        rx.await.map_err(|_| WardenError::AgentStopped)
    }
}

/// The running compliance agent.
pub struct ComplianceAgent {
    handle: AgentHandle,
    actor: JoinHandle<()>,
    tickers: Vec<JoinHandle<()>>,
}

impl ComplianceAgent {
    /// Build and start an agent against the production authority client.
    pub async fn start(
        config: WardenConfig,
        identity: DeviceIdentity,
        control: Arc<dyn DeviceControl>,
        probes: Arc<dyn TamperProbes>,
    ) -> Result<Self, WardenError> {
        let authority: Arc<dyn Authority> = Arc::new(AuthorityClient::new(
            &config.authority_endpoint,
            &config.api_key,
            &config.device_id,
            config.request_timeout,
        )?);
        Self::start_with_authority(config, identity, control, probes, authority).await
    }

    /// Build and start an agent against a caller-provided authority.
    pub async fn start_with_authority(
        config: WardenConfig,
        identity: DeviceIdentity,
        control: Arc<dyn DeviceControl>,
        probes: Arc<dyn TamperProbes>,
        authority: Arc<dyn Authority>,
    ) -> Result<Self, WardenError> {
        info!(
            device_id = %config.device_id,
            endpoint = %config.authority_endpoint,
            heartbeat_secs = config.heartbeat_interval.as_secs(),
            tamper_secs = config.tamper_interval.as_secs(),
            "Agent: starting"
        );

        let store = Arc::new(ComplianceStateStore::new(
            &config.device_id,
            config.state_dir.clone(),
        ));
        store.init()?;

        let machine = Arc::new(LockStateMachine::new(store.clone(), control));
        let tracker = EscalationTracker::new(store.clone(), config.policy.clone());
        let queue = Arc::new(OfflineCommandQueue::new(
            store.clone(),
            config.policy.retry_base,
            config.policy.retry_cap,
        ));
        let detector = Arc::new(TamperDetector::new(probes));
        let reconciler = Arc::new(HeartbeatReconciler::new(
            authority,
            detector,
            machine.clone(),
            queue.clone(),
            identity,
        ));

        // Boot recovery before anything else can race it.
        match machine.recover_from_boot().await {
            Ok(state) => info!(state = ?state, "Agent: boot recovery complete"),
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Agent: boot recovery lost device control");
            },
            Err(e) => warn!(error = %e, "Agent: boot recovery error"),
        }

        let notices = machine.subscribe();
        let (tx, rx) = mpsc::channel(64);

        let actor = tokio::spawn(actor_loop(
            rx,
            store,
            machine,
            tracker,
            queue,
            reconciler,
        ));

        let mut tickers = Vec::new();
        tickers.push(spawn_ticker(tx.clone(), config.heartbeat_interval, || {
            AgentCommand::HeartbeatTick
        }));
        tickers.push(spawn_ticker(tx.clone(), config.tamper_interval, || {
            AgentCommand::TamperTick
        }));

        Ok(Self {
            handle: AgentHandle { tx, notices },
            actor,
            tickers,
        })
    }

    /// A cloneable handle to the running agent.
    #[must_use]
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Stop the agent: tickers first, then the actor (which flushes the
    /// store).
    pub async fn stop(self) -> Result<(), WardenError> {
        for ticker in &self.tickers {
            ticker.abort();
        }
        self.handle.shutdown().await?;
        let _ = self.actor.await;
        Ok(())
    }
}

/// Spawn an interval task that sends one command per tick.
fn spawn_ticker(
    tx: mpsc::Sender<AgentCommand>,
    period: std::time::Duration,
    make: impl Fn() -> AgentCommand + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup (boot
        // recovery) settles before the first cycle.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(make()).await.is_err() {
                break;
            }
        }
    })
}

/// The single-writer actor loop.
async fn actor_loop(
    mut rx: mpsc::Receiver<AgentCommand>,
    store: Arc<ComplianceStateStore>,
    machine: Arc<LockStateMachine>,
    tracker: EscalationTracker,
    queue: Arc<OfflineCommandQueue>,
    reconciler: Arc<HeartbeatReconciler>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            AgentCommand::ReportViolation { category, reply } => {
                let decision = tracker.record_violation(&category);

                if decision.should_lock_hard {
                    let reason = format!(
                        "repeated {} violations ({} of threshold)",
                        category, decision.count
                    );
                    if let Err(e) = machine
                        .apply_hard_lock(
                            &reason,
                            LockType::ComplianceViolation,
                            LockSource::Local,
                            false,
                        )
                        .await
                    {
                        error!(error = %e, "Agent: escalation hard lock failed");
                    }
                    queue
                        .enqueue(
                            ALERT_CATEGORY_VIOLATION,
                            serde_json::json!({
                                "kind": "escalation",
                                "category": category,
                                "count": decision.count,
                            }),
                        )
                        .await;
                }

                let _ = reply.send(decision);
            },
            AgentCommand::ApplyDirective(directive) => {
                let severity = match reconciler.check_local_tamper().await {
                    Ok(status) => status.severity,
                    Err(e) => {
                        warn!(error = %e, "Agent: tamper check failed during push directive");
                        crate::tamper::TamperSeverity::None
                    },
                };
                if let Err(e) = reconciler.apply_directive(&directive, severity).await {
                    warn!(error = %e, "Agent: push directive failed");
                }
            },
            AgentCommand::Unlock { reply } => {
                let result = machine.unlock(LockSource::Local).await.map(|_| ());
                let _ = reply.send(result);
            },
            AgentCommand::ResetEscalation { category } => {
                tracker.reset(&category);
            },
            AgentCommand::SetSkipEnforcement(skip) => {
                machine.set_skip_enforcement(skip);
            },
            AgentCommand::HeartbeatTick => match reconciler.reconcile_once().await {
                Ok(outcome) => debug!(outcome = ?outcome, "Agent: heartbeat cycle complete"),
                Err(e) if e.is_transient() => {
                    debug!(error = %e, "Agent: heartbeat offline, retrying next cycle");
                },
                Err(e) => warn!(error = %e, "Agent: heartbeat cycle failed"),
            },
            AgentCommand::TamperTick => {
                if let Err(e) = reconciler.check_local_tamper().await {
                    warn!(error = %e, "Agent: tamper re-check failed");
                }
            },
            AgentCommand::Shutdown { reply } => {
                info!("Agent: shutting down");
                store.close();
                let _ = reply.send(());
                break;
            },
        }
    }
}
