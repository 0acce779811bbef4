//! Tracker: the operations behind the command surface
//!
//! Owns the catalog, subscription store, count ledger, acquirer and notifier.
//! Command handlers and the scheduler only talk to this type.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::acquisition::{AcquisitionResult, Acquirer};
use crate::detector::Comparison;
use crate::entity::{Catalog, EntityKey, TrackedEntity};
use crate::error::{Result, TrackerError};
use crate::ledger::CountLedger;
use crate::notifier::{format_message, Notifier};
use crate::store::{PutOutcome, SubscriberId, Subscription, SubscriptionStore};

/// Random pause inserted between consecutive acquisitions in bulk operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestSpacing {
    pub min: Duration,
    pub max: Duration,
}

impl Default for RequestSpacing {
    /// 2-5 seconds
    fn default() -> Self {
        Self {
            min: Duration::from_secs(2),
            max: Duration::from_secs(5),
        }
    }
}

impl RequestSpacing {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Pick a delay uniformly from `[min, max]`
    pub fn pick(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis = rand::thread_rng()
            .gen_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }

    async fn wait(&self) {
        let delay = self.pick();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Result of a one-off `/check`
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub entity: TrackedEntity,
    pub result: AcquisitionResult,
    /// Last recorded count, `None` on the first check of this entity
    pub previous: Option<u64>,
    pub comparison: Comparison,
}

impl CheckReport {
    pub fn message(&self) -> String {
        match self.previous {
            Some(_) => format_message(&self.entity.display_name, &self.comparison),
            None => format!(
                "📊 {}: {} items (first check)",
                self.entity.display_name, self.result.count
            ),
        }
    }
}

/// Outcome of subscribing to every catalog entity
#[derive(Debug, Clone, Default)]
pub struct BulkSubscribeReport {
    pub subscribed: Vec<Subscription>,
    pub already_subscribed: Vec<Subscription>,
    pub failed: Vec<(EntityKey, String)>,
}

impl BulkSubscribeReport {
    /// Entities the subscriber is now subscribed to
    pub fn success_count(&self) -> usize {
        self.subscribed.len() + self.already_subscribed.len()
    }

    pub fn total(&self) -> usize {
        self.success_count() + self.failed.len()
    }
}

/// Outcome of one sweep over all subscribed entities
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub entities_checked: usize,
    pub failed: Vec<(EntityKey, String)>,
    pub changed: Vec<EntityKey>,
    pub notifications_sent: usize,
    pub notification_failures: usize,
}

impl SweepReport {
    fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            finished_at: at,
            entities_checked: 0,
            failed: Vec::new(),
            changed: Vec::new(),
            notifications_sent: 0,
            notification_failures: 0,
        }
    }
}

/// Snapshot for `/status`
#[derive(Debug, Clone)]
pub struct TrackerStatus {
    pub entities: usize,
    pub subscriptions: usize,
    pub last_sweep: Option<SweepReport>,
}

/// Subscribers of one entity, as seen by a sweep
struct EntityGroup {
    entity: TrackedEntity,
    subscribers: Vec<(SubscriberId, u64)>,
}

pub struct Tracker {
    catalog: Arc<Catalog>,
    store: Arc<dyn SubscriptionStore>,
    ledger: Arc<CountLedger>,
    acquirer: Arc<Acquirer>,
    notifier: Notifier,
    spacing: RequestSpacing,
    last_sweep: RwLock<Option<SweepReport>>,
}

impl Tracker {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn SubscriptionStore>,
        ledger: Arc<CountLedger>,
        acquirer: Arc<Acquirer>,
        notifier: Notifier,
    ) -> Self {
        Self {
            catalog,
            store,
            ledger,
            acquirer,
            notifier,
            spacing: RequestSpacing::default(),
            last_sweep: RwLock::new(None),
        }
    }

    pub fn with_request_spacing(mut self, spacing: RequestSpacing) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn acquirer(&self) -> &Arc<Acquirer> {
        &self.acquirer
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    async fn resolve(&self, key: &EntityKey) -> Result<TrackedEntity> {
        self.catalog
            .resolve(key)
            .await
            .ok_or_else(|| TrackerError::entity_not_found(key))
    }

    /// Acquire the current count of one entity and compare it with the ledger
    #[instrument(skip(self))]
    pub async fn check_one(&self, key: &EntityKey) -> Result<CheckReport> {
        let entity = self.resolve(key).await?;
        let previous = self.ledger.get_last(&entity.key).await?.map(|r| r.count);

        let result = self.acquirer.acquire(&entity).await?;
        let comparison = Comparison::compare(previous.unwrap_or(0), result.count);
        self.ledger
            .record(&entity.key, result.count, result.timestamp)
            .await?;

        Ok(CheckReport {
            entity,
            result,
            previous,
            comparison,
        })
    }

    /// Check every catalog entity in turn
    pub async fn check_all(&self) -> Vec<(EntityKey, Result<CheckReport>)> {
        let entities = self.catalog.list().await;
        let mut reports = Vec::with_capacity(entities.len());

        for (i, entity) in entities.into_iter().enumerate() {
            if i > 0 {
                self.spacing.wait().await;
            }
            let outcome = self.check_one(&entity.key).await;
            reports.push((entity.key, outcome));
        }
        reports
    }

    pub async fn list_entities(&self) -> Vec<TrackedEntity> {
        self.catalog.list().await
    }

    /// Register a page-backed entity in the catalog
    pub async fn add_entity(
        &self,
        key: &str,
        url: &str,
        name: Option<&str>,
    ) -> Result<TrackedEntity> {
        let entity = self
            .catalog
            .add(
                EntityKey::new(key),
                name.unwrap_or(key).to_string(),
                url.to_string(),
            )
            .await?;
        info!(entity = %entity.key, url, "Entity added to catalog");
        Ok(entity)
    }

    /// Subscribe to one entity
    ///
    /// An existing subscription is returned as-is without acquiring.
    #[instrument(skip(self))]
    pub async fn subscribe(&self, subscriber: SubscriberId, key: &EntityKey) -> Result<PutOutcome> {
        let entity = self.resolve(key).await?;
        if let Some(existing) = self.store.get(subscriber, &entity.key).await? {
            return Ok(PutOutcome::AlreadySubscribed(existing));
        }

        let result = self.acquirer.acquire(&entity).await?;
        self.ledger
            .record(&entity.key, result.count, result.timestamp)
            .await?;
        let outcome = self.store.put(subscriber, &entity, result.count).await?;
        if outcome.was_created() {
            info!(count = result.count, "Subscribed");
        }
        Ok(outcome)
    }

    /// Subscribe to every catalog entity, pausing between acquisitions
    pub async fn subscribe_all(&self, subscriber: SubscriberId) -> BulkSubscribeReport {
        let mut report = BulkSubscribeReport::default();
        let mut acquired_before = false;

        for entity in self.catalog.list().await {
            let already = match self.store.get(subscriber, &entity.key).await {
                Ok(existing) => existing,
                Err(e) => {
                    report.failed.push((entity.key.clone(), e.to_string()));
                    continue;
                }
            };
            if let Some(existing) = already {
                report.already_subscribed.push(existing);
                continue;
            }

            if acquired_before {
                self.spacing.wait().await;
            }
            acquired_before = true;

            match self.subscribe(subscriber, &entity.key).await {
                Ok(PutOutcome::Created(sub)) => report.subscribed.push(sub),
                Ok(PutOutcome::AlreadySubscribed(sub)) => report.already_subscribed.push(sub),
                Err(e) => {
                    warn!(subscriber = %subscriber, entity = %entity.key, error = %e, "Bulk subscribe failed for entity");
                    report.failed.push((entity.key.clone(), e.to_string()));
                }
            }
        }

        info!(
            subscriber = %subscriber,
            succeeded = report.success_count(),
            total = report.total(),
            "Bulk subscribe finished"
        );
        report
    }

    pub async fn unsubscribe(&self, subscriber: SubscriberId, key: &EntityKey) -> Result<()> {
        if self.store.remove(subscriber, key).await? {
            info!(subscriber = %subscriber, entity = %key, "Unsubscribed");
            Ok(())
        } else {
            Err(TrackerError::subscription_not_found(key))
        }
    }

    /// Current subscriptions of one subscriber, ordered by entity key
    pub async fn subscriptions(&self, subscriber: SubscriberId) -> Result<Vec<Subscription>> {
        Ok(self
            .store
            .for_subscriber(subscriber)
            .await?
            .into_values()
            .collect())
    }

    pub async fn status(&self, subscriber: SubscriberId) -> Result<TrackerStatus> {
        Ok(TrackerStatus {
            entities: self.catalog.list().await.len(),
            subscriptions: self.store.for_subscriber(subscriber).await?.len(),
            last_sweep: self.last_sweep.read().await.clone(),
        })
    }

    pub async fn last_sweep(&self) -> Option<SweepReport> {
        self.last_sweep.read().await.clone()
    }

    /// Check every subscribed entity once and notify on change
    ///
    /// Entities are processed sequentially and acquired once each. A failure on
    /// one entity is logged and the sweep moves on. Every subscription of a
    /// successfully acquired entity gets the new count, changed or not.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::started(Utc::now());

        let snapshot = match self.store.all().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Failed to load subscriptions, sweep aborted");
                report.finished_at = Utc::now();
                return report;
            }
        };

        let mut groups: BTreeMap<EntityKey, EntityGroup> = BTreeMap::new();
        for (subscriber, entries) in snapshot {
            for (key, subscription) in entries {
                groups
                    .entry(key)
                    .or_insert_with(|| EntityGroup {
                        entity: subscription.entity.to_entity(),
                        subscribers: Vec::new(),
                    })
                    .subscribers
                    .push((subscriber, subscription.last_product_count));
            }
        }

        info!(entities = groups.len(), "Sweep started");

        for (key, group) in groups {
            let entity = self
                .catalog
                .resolve(&key)
                .await
                .unwrap_or(group.entity);

            if let Err(e) = self.sweep_entity(&entity, &group.subscribers, &mut report).await {
                warn!(entity = %key, error = %e, "Sweep failed for entity, continuing");
                report.failed.push((key, e.to_string()));
            }
        }

        report.finished_at = Utc::now();
        info!(
            checked = report.entities_checked,
            failed = report.failed.len(),
            changed = report.changed.len(),
            notifications = report.notifications_sent,
            "Sweep finished"
        );
        *self.last_sweep.write().await = Some(report.clone());
        report
    }

    async fn sweep_entity(
        &self,
        entity: &TrackedEntity,
        subscribers: &[(SubscriberId, u64)],
        report: &mut SweepReport,
    ) -> Result<()> {
        let result = self.acquirer.acquire(entity).await?;
        report.entities_checked += 1;

        let mut by_previous: BTreeMap<u64, Vec<SubscriberId>> = BTreeMap::new();
        for &(subscriber, previous) in subscribers {
            by_previous.entry(previous).or_default().push(subscriber);
        }

        let mut changed = false;
        for (previous, group) in by_previous {
            let comparison = Comparison::compare(previous, result.count);
            if !comparison.changed {
                continue;
            }
            changed = true;
            let delivery = self.notifier.notify(entity, &comparison, &group).await;
            report.notifications_sent += delivery.delivered;
            report.notification_failures += delivery.failed.len();
        }
        if changed {
            report.changed.push(entity.key.clone());
        }

        for &(subscriber, _) in subscribers {
            self.store
                .update(subscriber, &entity.key, result.count, result.timestamp)
                .await?;
        }
        self.ledger
            .record(&entity.key, result.count, result.timestamp)
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("catalog", &self.catalog)
            .field("acquirer", &self.acquirer)
            .field("spacing", &self.spacing)
            .finish_non_exhaustive()
    }
}
