//! Durable FIFO of outbound alerts awaiting delivery.
//!
//! Commands are enqueued when an alert cannot be delivered synchronously
//! (the device is offline, the authority is down) and drained on the next
//! successful contact. Ordering is FIFO per logical category: a failing
//! category stops draining *that* category to preserve order, while
//! independent categories continue. Backoff is exponential per item,
//! capped, and persisted in `next_retry_at` so the schedule survives a
//! process restart.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::WardenError;
use crate::store::{now_ts, ComplianceStateStore};

/// Delivery status of a queued command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Awaiting delivery.
    Pending,
    /// Confirmed delivered (about to be pruned).
    Delivered,
    /// Exceeded the attempt budget; still retried at the backoff cap but
    /// flagged for administrator attention.
    Failed,
}

/// Attempts after which a command is flagged [`CommandStatus::Failed`].
const FAILED_ATTEMPT_THRESHOLD: u32 = 10;

/// One outbound alert/event awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedCommand {
    /// Unique command id.
    pub id: Uuid,
    /// Logical category (ordering domain), e.g. `tamper_alert`.
    pub category: String,
    /// Opaque payload delivered to the authority.
    pub payload: serde_json::Value,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Delivery attempts so far.
    pub attempts: u32,
    /// Unix timestamp before which no retry is attempted.
    pub next_retry_at: i64,
    /// Delivery status.
    pub status: CommandStatus,
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Commands confirmed delivered and pruned.
    pub delivered: usize,
    /// Commands that failed and were rescheduled.
    pub rescheduled: usize,
    /// Commands skipped because their retry time has not come.
    pub deferred: usize,
}

/// Durable outbound command queue.
pub struct OfflineCommandQueue {
    store: Arc<ComplianceStateStore>,
    retry_base: Duration,
    retry_cap: Duration,
    /// Serializes enqueue/drain against each other.
    guard: tokio::sync::Mutex<()>,
}

impl OfflineCommandQueue {
    /// Create a queue over the given store.
    pub fn new(store: Arc<ComplianceStateStore>, retry_base: Duration, retry_cap: Duration) -> Self {
        Self {
            store,
            retry_base,
            retry_cap,
            guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Enqueue a payload for delivery. Returns the command id.
    pub async fn enqueue(&self, category: &str, payload: serde_json::Value) -> Uuid {
        let _guard = self.guard.lock().await;

        let command = QueuedCommand {
            id: Uuid::new_v4(),
            category: category.to_string(),
            payload,
            created_at: now_ts(),
            attempts: 0,
            next_retry_at: 0,
            status: CommandStatus::Pending,
        };
        let id = command.id;

        let mut commands = self.store.queue_snapshot();
        commands.push(command);
        self.store.replace_queue(commands);

        debug!(category = %category, id = %id, "Queue: command enqueued");
        id
    }

    /// Number of commands awaiting delivery.
    pub async fn len(&self) -> usize {
        let _guard = self.guard.lock().await;
        self.store.queue_snapshot().len()
    }

    /// Check whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every queued command (administrator purge).
    pub async fn purge(&self) -> usize {
        let _guard = self.guard.lock().await;
        let purged = self.store.queue_snapshot().len();
        self.store.replace_queue(Vec::new());
        info!(purged, "Queue: purged by administrator");
        purged
    }

    /// Attempt delivery of everything that is due.
    ///
    /// `deliver` is called once per due command, in FIFO order within
    /// each category. The first failure in a category stops that
    /// category for this pass; other categories keep draining.
    pub async fn drain<F, Fut>(&self, deliver: F) -> DrainReport
    where
        F: Fn(QueuedCommand) -> Fut,
        Fut: std::future::Future<Output = Result<(), WardenError>>,
    {
        let _guard = self.guard.lock().await;

        let commands = self.store.queue_snapshot();
        if commands.is_empty() {
            return DrainReport::default();
        }

        let now = now_ts();
        let mut report = DrainReport::default();
        let mut remaining: Vec<QueuedCommand> = Vec::with_capacity(commands.len());
        // Categories that already failed this pass; later items in them
        // are retained untouched to preserve FIFO order.
        let mut stopped: Vec<String> = Vec::new();

        for mut command in commands {
            if stopped.contains(&command.category) {
                remaining.push(command);
                continue;
            }
            if command.next_retry_at > now {
                report.deferred += 1;
                remaining.push(command);
                continue;
            }

            match deliver(command.clone()).await {
                Ok(()) => {
                    debug!(
                        id = %command.id,
                        category = %command.category,
                        attempts = command.attempts,
                        "Queue: command delivered"
                    );
                    report.delivered += 1;
                    // Delivered commands are pruned, not retained.
                },
                Err(e) => {
                    command.attempts += 1;
                    command.next_retry_at = now + self.backoff(command.attempts).as_secs() as i64;
                    if command.attempts >= FAILED_ATTEMPT_THRESHOLD {
                        command.status = CommandStatus::Failed;
                    }
                    warn!(
                        id = %command.id,
                        category = %command.category,
                        attempts = command.attempts,
                        next_retry_at = command.next_retry_at,
                        error = %e,
                        "Queue: delivery failed, rescheduled"
                    );
                    report.rescheduled += 1;
                    stopped.push(command.category.clone());
                    remaining.push(command);
                },
            }
        }

        self.store.replace_queue(remaining);
        report
    }

    /// Exponential backoff for the nth attempt, capped.
    fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(20);
        let delay = self.retry_base.saturating_mul(1u32 << exp);
        delay.min(self.retry_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_queue() -> (OfflineCommandQueue, Arc<ComplianceStateStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
        store.init().unwrap();
        let queue = OfflineCommandQueue::new(
            store.clone(),
            Duration::from_secs(30),
            Duration::from_secs(3600),
        );
        (queue, store, dir)
    }

    #[tokio::test]
    async fn test_enqueue_and_drain_in_order() {
        let (queue, _store, _dir) = test_queue();
        queue
            .enqueue("tamper_alert", serde_json::json!({"seq": 1}))
            .await;
        queue
            .enqueue("tamper_alert", serde_json::json!({"seq": 2}))
            .await;

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = order.clone();
        let report = queue
            .drain(move |cmd| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(cmd.payload["seq"].as_i64().unwrap());
                    Ok(())
                }
            })
            .await;

        assert_eq!(report.delivered, 2);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_category_stops_but_others_continue() {
        let (queue, _store, _dir) = test_queue();
        queue.enqueue("alpha", serde_json::json!({"n": 1})).await;
        queue.enqueue("alpha", serde_json::json!({"n": 2})).await;
        queue.enqueue("beta", serde_json::json!({"n": 3})).await;

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let report = queue
            .drain(move |cmd| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if cmd.category == "alpha" {
                        Err(WardenError::Transport {
                            message: "offline".into(),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        // alpha: first item attempted and failed, second never attempted.
        // beta: delivered.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.rescheduled, 1);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_backoff_is_persisted() {
        let (queue, store, _dir) = test_queue();
        queue.enqueue("alpha", serde_json::json!({})).await;

        queue
            .drain(|_cmd| async {
                Err(WardenError::Transport {
                    message: "offline".into(),
                })
            })
            .await;

        let persisted = store.queue_snapshot();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].attempts, 1);
        assert!(persisted[0].next_retry_at > now_ts());

        // Not yet due: drain defers without calling deliver.
        let report = queue
            .drain(|_cmd| async { panic!("must not be attempted before retry time") })
            .await;
        assert_eq!(report.deferred, 1);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
            store.init().unwrap();
            let queue = OfflineCommandQueue::new(
                store,
                Duration::from_secs(30),
                Duration::from_secs(3600),
            );
            queue.enqueue("alpha", serde_json::json!({"n": 1})).await;
        }

        let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
        store.init().unwrap();
        let queue = OfflineCommandQueue::new(
            store,
            Duration::from_secs(30),
            Duration::from_secs(3600),
        );
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_purge() {
        let (queue, _store, _dir) = test_queue();
        queue.enqueue("alpha", serde_json::json!({})).await;
        queue.enqueue("beta", serde_json::json!({})).await;

        assert_eq!(queue.purge().await, 2);
        assert!(queue.is_empty().await);
    }

    #[test]
    fn test_backoff_caps() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ComplianceStateStore::new("device-1", dir.path()));
        let queue = OfflineCommandQueue::new(
            store,
            Duration::from_secs(30),
            Duration::from_secs(3600),
        );

        assert_eq!(queue.backoff(1), Duration::from_secs(30));
        assert_eq!(queue.backoff(2), Duration::from_secs(60));
        assert_eq!(queue.backoff(3), Duration::from_secs(120));
        assert_eq!(queue.backoff(30), Duration::from_secs(3600));
    }
}
