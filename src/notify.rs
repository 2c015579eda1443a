//! Transfer Notifications
//!
//! The transfer engine hands committed transfer ids to a [`Notifier`] from a
//! post-commit hook. [`ChannelNotifier`] puts them on a bounded tokio queue
//! without waiting; when the queue is full the id is parked on a task that
//! waits for room, so a committed transfer is never dropped for lack of space.
//! [`NotificationWorker`] drains the queue in the background and delivers up
//! to `max_in_flight` ids at once, each with its own retry and backoff.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::core_types::TransferId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification queue closed")]
    Closed,

    #[error("Delivery of transfer {0} failed")]
    DeliveryFailed(TransferId),
}

/// At-least-once hand-off of committed transfers
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn enqueue(&self, transfer_id: TransferId) -> Result<(), NotifyError>;
}

// ============================================================================
// Queue
// ============================================================================

/// Sender side, used from commit hooks
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<TransferId>,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn enqueue(&self, transfer_id: TransferId) -> Result<(), NotifyError> {
        // Never block the request path on a slow worker
        match self.tx.try_send(transfer_id) {
            Ok(()) => {
                debug!(transfer_id, "Notification enqueued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(id)) => {
                warn!(transfer_id = id, "Notification queue full, waiting for room");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(id).await.is_err() {
                        warn!(transfer_id = id, "Notification queue closed before hand-off");
                    }
                });
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(NotifyError::Closed),
        }
    }
}

/// Create a bounded notification queue
pub fn notification_channel(queue_size: usize) -> (ChannelNotifier, mpsc::Receiver<TransferId>) {
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    (ChannelNotifier { tx }, rx)
}

// ============================================================================
// Worker
// ============================================================================

/// Delivery policy of the worker
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Simulated delivery latency per attempt
    pub delay: Duration,
    /// Probability in `[0, 1]` that an attempt fails
    pub fail_rate: f64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Deliveries running at the same time
    pub max_in_flight: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(2),
            fail_rate: 0.0,
            max_retries: 5,
            max_in_flight: 64,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

impl From<&NotifyConfig> for DeliveryPolicy {
    fn from(c: &NotifyConfig) -> Self {
        Self {
            delay: Duration::from_millis(c.delay_ms),
            fail_rate: c.fail_rate.clamp(0.0, 1.0),
            max_retries: c.max_retries,
            max_in_flight: c.max_in_flight.max(1),
            backoff_base: Duration::from_millis(c.backoff_base_ms),
            backoff_max: Duration::from_millis(c.backoff_max_ms),
        }
    }
}

impl DeliveryPolicy {
    /// Wait before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Delivery counters
#[derive(Debug, Default)]
pub struct NotifyStats {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub attempts: AtomicU64,
}

impl NotifyStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

/// Background consumer of the notification queue
pub struct NotificationWorker {
    rx: mpsc::Receiver<TransferId>,
    delivery: Arc<Delivery>,
}

/// Shared by every in-flight delivery task
struct Delivery {
    policy: DeliveryPolicy,
    stats: Arc<NotifyStats>,
}

impl NotificationWorker {
    pub fn new(rx: mpsc::Receiver<TransferId>, policy: DeliveryPolicy) -> Self {
        Self {
            rx,
            delivery: Arc::new(Delivery {
                policy,
                stats: Arc::new(NotifyStats::default()),
            }),
        }
    }

    pub fn stats(&self) -> Arc<NotifyStats> {
        Arc::clone(&self.delivery.stats)
    }

    /// Run until every sender is dropped, the queue is empty and the last
    /// in-flight delivery has finished.
    pub async fn run(mut self) {
        let policy = &self.delivery.policy;
        let max_in_flight = policy.max_in_flight.clamp(1, u32::MAX as usize);
        info!(
            delay_ms = policy.delay.as_millis() as u64,
            fail_rate = policy.fail_rate,
            max_retries = policy.max_retries,
            max_in_flight,
            "Starting notification worker"
        );

        let slots = Arc::new(Semaphore::new(max_in_flight));
        while let Some(transfer_id) = self.rx.recv().await {
            // Stop pulling from the queue while every slot is busy
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };
            let delivery = Arc::clone(&self.delivery);
            tokio::spawn(async move {
                delivery.deliver_with_retry(transfer_id).await;
                drop(permit);
            });
        }

        // Wait for the stragglers
        let _ = slots.acquire_many(max_in_flight as u32).await;

        let stats = &self.delivery.stats;
        info!(
            delivered = stats.delivered(),
            failed = stats.failed(),
            "Notification worker stopped"
        );
    }

    /// Deliver one notification, retrying with backoff. Returns whether it went out.
    pub async fn deliver_with_retry(&self, transfer_id: TransferId) -> bool {
        self.delivery.deliver_with_retry(transfer_id).await
    }
}

impl Delivery {
    async fn deliver_with_retry(&self, transfer_id: TransferId) -> bool {
        let mut retry = 0;
        loop {
            match self.attempt(transfer_id).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    info!(transfer_id, retries = retry, "Notification sent");
                    return true;
                }
                Err(e) if retry < self.policy.max_retries => {
                    let wait = self.policy.backoff(retry);
                    warn!(
                        transfer_id,
                        retry,
                        backoff_ms = wait.as_millis() as u64,
                        error = %e,
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    retry += 1;
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(transfer_id, retries = retry, error = %e, "Notification given up");
                    return false;
                }
            }
        }
    }

    async fn attempt(&self, transfer_id: TransferId) -> Result<(), NotifyError> {
        self.stats.attempts.fetch_add(1, Ordering::Relaxed);
        if !self.policy.delay.is_zero() {
            tokio::time::sleep(self.policy.delay).await;
        }
        if self.policy.fail_rate > 0.0 && rand::random::<f64>() < self.policy.fail_rate {
            return Err(NotifyError::DeliveryFailed(transfer_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_policy(fail_rate: f64, max_retries: u32) -> DeliveryPolicy {
        DeliveryPolicy {
            delay: Duration::ZERO,
            fail_rate,
            max_retries,
            max_in_flight: 4,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = DeliveryPolicy {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(1000),
            ..Default::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_enqueue_when_full_waits_for_room_instead_of_dropping() {
        let (notifier, mut rx) = notification_channel(1);
        notifier.enqueue(1).await.unwrap();
        // Returns immediately even though the queue has no room
        notifier.enqueue(2).await.unwrap();
        notifier.enqueue(3).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(rx.recv().await.unwrap());
        }
        received.sort();
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_slow_delivery_with_small_queue_loses_nothing() {
        let (notifier, rx) = notification_channel(4);
        let worker = NotificationWorker::new(
            rx,
            DeliveryPolicy {
                delay: Duration::from_millis(200),
                max_in_flight: 8,
                ..instant_policy(0.0, 0)
            },
        );
        let stats = worker.stats();
        let running = tokio::spawn(worker.run());

        for id in 1..=20 {
            notifier.enqueue(id).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(notifier);
        running.await.unwrap();

        assert_eq!(stats.delivered(), 20);
        assert_eq!(stats.failed(), 0);
    }

    #[tokio::test]
    async fn test_worker_delivers_concurrently() {
        let (notifier, rx) = notification_channel(16);
        let worker = NotificationWorker::new(
            rx,
            DeliveryPolicy {
                delay: Duration::from_millis(100),
                max_in_flight: 10,
                ..instant_policy(0.0, 0)
            },
        );
        let stats = worker.stats();

        for id in 1..=10 {
            notifier.enqueue(id).await.unwrap();
        }
        drop(notifier);
        let started = std::time::Instant::now();
        worker.run().await;

        assert_eq!(stats.delivered(), 10);
        // One at a time would take a full second
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn test_enqueue_after_worker_gone() {
        let (notifier, rx) = notification_channel(4);
        drop(rx);
        assert_eq!(notifier.enqueue(1).await, Err(NotifyError::Closed));
    }

    #[tokio::test]
    async fn test_worker_drains_queue_then_stops() {
        let (notifier, rx) = notification_channel(8);
        let worker = NotificationWorker::new(rx, instant_policy(0.0, 0));
        let stats = worker.stats();

        for id in 1..=3 {
            notifier.enqueue(id).await.unwrap();
        }
        drop(notifier);
        worker.run().await;

        assert_eq!(stats.delivered(), 3);
        assert_eq!(stats.failed(), 0);
    }

    #[tokio::test]
    async fn test_always_failing_delivery_gives_up_after_retries() {
        let (_notifier, rx) = notification_channel(1);
        let worker = NotificationWorker::new(rx, instant_policy(1.0, 3));

        assert!(!worker.deliver_with_retry(9).await);
        let stats = worker.stats();
        assert_eq!(stats.attempts(), 4);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.delivered(), 0);
    }
}
