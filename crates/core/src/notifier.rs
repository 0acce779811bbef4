//! Change notifications
//!
//! Formats one message per entity per change and fans it out to that entity's
//! subscribers. Delivery failures are logged per subscriber and never retried.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::detector::Comparison;
use crate::entity::TrackedEntity;
use crate::store::SubscriberId;

/// A message could not be delivered
#[derive(Debug, Clone, Error)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

impl DeliveryError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Outbound channel to subscribers
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, subscriber: SubscriberId, text: &str) -> Result<(), DeliveryError>;
}

/// Render a comparison for humans
pub fn format_message(entity_name: &str, comparison: &Comparison) -> String {
    if !comparison.changed {
        return format!(
            "📊 {}: no change ({} items)",
            entity_name, comparison.current
        );
    }

    let emoji = if comparison.increased { "📈" } else { "📉" };
    let sign = comparison.sign();
    format!(
        "{} {}:\nwas: {} items\nnow: {} items\nchange: {}{} ({}{}%)",
        emoji,
        entity_name,
        comparison.previous,
        comparison.current,
        sign,
        comparison.delta,
        sign,
        comparison.percent_change
    )
}

/// Delivery tally for one notification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: Vec<SubscriberId>,
}

/// Fans change messages out through a [`MessageSender`]
#[derive(Clone)]
pub struct Notifier {
    sender: Arc<dyn MessageSender>,
}

impl Notifier {
    pub fn new(sender: Arc<dyn MessageSender>) -> Self {
        Self { sender }
    }

    /// Send `text` to one subscriber
    pub async fn send(&self, subscriber: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        self.sender.send(subscriber, text).await
    }

    /// Notify every subscriber in `subscribers` about a change of `entity`
    ///
    /// Sends sequentially, the same text to each. A failure for one subscriber
    /// does not prevent delivery to the rest.
    pub async fn notify(
        &self,
        entity: &TrackedEntity,
        comparison: &Comparison,
        subscribers: &[SubscriberId],
    ) -> NotifyReport {
        let text = format_message(&entity.display_name, comparison);
        let mut report = NotifyReport::default();

        for &subscriber in subscribers {
            match self.sender.send(subscriber, &text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(entity = %entity.key, subscriber = %subscriber, error = %e, "Failed to notify subscriber");
                    report.failed.push(subscriber);
                }
            }
        }

        info!(
            entity = %entity.key,
            previous = comparison.previous,
            current = comparison.current,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Change notification sent"
        );
        report
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}

/// Sender that records messages in memory
///
/// Subscribers listed via [`RecordingSender::fail_for`] get a delivery error.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(SubscriberId, String)>>,
    failing: Mutex<Vec<SubscriberId>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_for(&self, subscriber: SubscriberId) {
        self.failing.lock().await.push(subscriber);
    }

    /// Messages delivered so far, in order
    pub async fn sent(&self) -> Vec<(SubscriberId, String)> {
        self.sent.lock().await.clone()
    }

    /// Messages delivered to one subscriber
    pub async fn sent_to(&self, subscriber: SubscriberId) -> Vec<String> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(s, _)| *s == subscriber)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, subscriber: SubscriberId, text: &str) -> Result<(), DeliveryError> {
        if self.failing.lock().await.contains(&subscriber) {
            return Err(DeliveryError::new(format!("chat {} unreachable", subscriber)));
        }
        self.sent.lock().await.push((subscriber, text.to_string()));
        Ok(())
    }
}
