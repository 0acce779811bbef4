//! Subscription store
//!
//! Durable mapping `subscriber -> entity -> Subscription`, the only source of
//! "previous count" for sweeps.
//!
//! Duplicate policy: `put` on an existing (subscriber, entity) pair is an
//! idempotent no-op that returns the existing record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::entity::{EntityKey, Locator, TrackedEntity};
use crate::error::StoreError;
use crate::fsutil;

/// Chat or session identifier of a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub i64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Subscription record type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    Category,
}

/// Entity metadata copied into the subscription at subscribe time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMeta {
    pub category_key: EntityKey,
    pub category_name: String,
    #[serde(flatten)]
    pub locator: Locator,
}

impl From<&TrackedEntity> for EntityMeta {
    fn from(entity: &TrackedEntity) -> Self {
        Self {
            category_key: entity.key.clone(),
            category_name: entity.display_name.clone(),
            locator: entity.locator.clone(),
        }
    }
}

impl EntityMeta {
    /// Rebuild the tracked entity this subscription points at
    pub fn to_entity(&self) -> TrackedEntity {
        TrackedEntity {
            key: self.category_key.clone(),
            display_name: self.category_name.clone(),
            locator: self.locator.clone(),
        }
    }
}

/// One subscriber's interest in one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    #[serde(flatten)]
    pub entity: EntityMeta,
    pub subscribed_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_product_count: u64,
}

impl Subscription {
    pub fn new(entity: &TrackedEntity, initial_count: u64, now: DateTime<Utc>) -> Self {
        Self {
            kind: SubscriptionKind::Category,
            entity: EntityMeta::from(entity),
            subscribed_at: now,
            last_checked: None,
            last_product_count: initial_count,
        }
    }
}

/// Full snapshot of all subscriptions
pub type SubscriptionMap = BTreeMap<SubscriberId, BTreeMap<EntityKey, Subscription>>;

/// Result of a `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Created(Subscription),
    AlreadySubscribed(Subscription),
}

impl PutOutcome {
    pub fn subscription(&self) -> &Subscription {
        match self {
            Self::Created(s) | Self::AlreadySubscribed(s) => s,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Trait for persisting subscriptions
///
/// Implementations:
/// - [`JsonSubscriptionStore`] for the bot (flat JSON file)
/// - [`InMemorySubscriptionStore`] for tests and examples
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(
        &self,
        subscriber: SubscriberId,
        key: &EntityKey,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Subscribe; idempotent no-op when the pair already exists
    async fn put(
        &self,
        subscriber: SubscriberId,
        entity: &TrackedEntity,
        initial_count: u64,
    ) -> Result<PutOutcome, StoreError>;

    /// Unsubscribe; returns whether a record was removed
    ///
    /// The subscriber's parent record is pruned when it becomes empty.
    async fn remove(&self, subscriber: SubscriberId, key: &EntityKey) -> Result<bool, StoreError>;

    /// Record a fresh count; a silent no-op (returning false) when the pair is absent
    async fn update(
        &self,
        subscriber: SubscriberId,
        key: &EntityKey,
        count: u64,
        checked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Full snapshot for sweep iteration
    async fn all(&self) -> Result<SubscriptionMap, StoreError>;

    /// Subscriptions of one subscriber
    async fn for_subscriber(
        &self,
        subscriber: SubscriberId,
    ) -> Result<BTreeMap<EntityKey, Subscription>, StoreError> {
        Ok(self.all().await?.remove(&subscriber).unwrap_or_default())
    }

    async fn is_subscribed(
        &self,
        subscriber: SubscriberId,
        key: &EntityKey,
    ) -> Result<bool, StoreError> {
        Ok(self.get(subscriber, key).await?.is_some())
    }
}

// ============================================================================
// Map operations shared by both backends
// ============================================================================

fn put_into(
    map: &mut SubscriptionMap,
    subscriber: SubscriberId,
    entity: &TrackedEntity,
    initial_count: u64,
) -> PutOutcome {
    let entries = map.entry(subscriber).or_default();
    if let Some(existing) = entries.get(&entity.key) {
        return PutOutcome::AlreadySubscribed(existing.clone());
    }
    let subscription = Subscription::new(entity, initial_count, Utc::now());
    entries.insert(entity.key.clone(), subscription.clone());
    PutOutcome::Created(subscription)
}

fn remove_from(map: &mut SubscriptionMap, subscriber: SubscriberId, key: &EntityKey) -> bool {
    let Some(entries) = map.get_mut(&subscriber) else {
        return false;
    };
    let removed = entries.remove(key).is_some();
    if entries.is_empty() {
        map.remove(&subscriber);
    }
    removed
}

fn update_in(
    map: &mut SubscriptionMap,
    subscriber: SubscriberId,
    key: &EntityKey,
    count: u64,
    checked_at: DateTime<Utc>,
) -> bool {
    match map.get_mut(&subscriber).and_then(|e| e.get_mut(key)) {
        Some(subscription) => {
            subscription.last_product_count = count;
            subscription.last_checked = Some(checked_at);
            true
        }
        None => false,
    }
}

// ============================================================================
// JsonSubscriptionStore
// ============================================================================

/// Subscription store backed by one pretty-printed JSON file
///
/// Every call loads the whole file; mutating calls save it back. There is no
/// cache. Load-modify-save cycles run under one async mutex, so two mutations
/// from this process never overwrite each other. Other processes writing the
/// same file are not coordinated with.
#[derive(Debug)]
pub struct JsonSubscriptionStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonSubscriptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable content loads as an empty map
    async fn load(&self) -> Result<SubscriptionMap, StoreError> {
        match fsutil::read_json(&self.path).await {
            Ok(map) => Ok(map.unwrap_or_default()),
            Err(StoreError::Serialization(e)) => {
                warn!(path = %self.path.display(), error = %e, "Subscriptions file is corrupt, starting empty");
                Ok(SubscriptionMap::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn save(&self, map: &SubscriptionMap) -> Result<(), StoreError> {
        fsutil::write_json(&self.path, map).await?;
        debug!(path = %self.path.display(), subscribers = map.len(), "Subscriptions saved");
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for JsonSubscriptionStore {
    async fn get(
        &self,
        subscriber: SubscriberId,
        key: &EntityKey,
    ) -> Result<Option<Subscription>, StoreError> {
        let map = self.load().await?;
        Ok(map.get(&subscriber).and_then(|e| e.get(key)).cloned())
    }

    async fn put(
        &self,
        subscriber: SubscriberId,
        entity: &TrackedEntity,
        initial_count: u64,
    ) -> Result<PutOutcome, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        let outcome = put_into(&mut map, subscriber, entity, initial_count);
        if outcome.was_created() {
            self.save(&map).await?;
        }
        Ok(outcome)
    }

    async fn remove(&self, subscriber: SubscriberId, key: &EntityKey) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        let removed = remove_from(&mut map, subscriber, key);
        if removed {
            self.save(&map).await?;
        }
        Ok(removed)
    }

    async fn update(
        &self,
        subscriber: SubscriberId,
        key: &EntityKey,
        count: u64,
        checked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        let updated = update_in(&mut map, subscriber, key, count, checked_at);
        if updated {
            self.save(&map).await?;
        } else {
            debug!(subscriber = %subscriber, entity = %key, "Update for missing subscription ignored");
        }
        Ok(updated)
    }

    async fn all(&self) -> Result<SubscriptionMap, StoreError> {
        self.load().await
    }
}

// ============================================================================
// InMemorySubscriptionStore
// ============================================================================

/// In-memory subscription store
#[derive(Debug, Default, Clone)]
pub struct InMemorySubscriptionStore {
    map: Arc<RwLock<SubscriptionMap>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a subscription (useful for testing)
    pub async fn seed(&self, subscriber: SubscriberId, subscription: Subscription) {
        self.map
            .write()
            .await
            .entry(subscriber)
            .or_default()
            .insert(subscription.entity.category_key.clone(), subscription);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(
        &self,
        subscriber: SubscriberId,
        key: &EntityKey,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .map
            .read()
            .await
            .get(&subscriber)
            .and_then(|e| e.get(key))
            .cloned())
    }

    async fn put(
        &self,
        subscriber: SubscriberId,
        entity: &TrackedEntity,
        initial_count: u64,
    ) -> Result<PutOutcome, StoreError> {
        Ok(put_into(
            &mut *self.map.write().await,
            subscriber,
            entity,
            initial_count,
        ))
    }

    async fn remove(&self, subscriber: SubscriberId, key: &EntityKey) -> Result<bool, StoreError> {
        Ok(remove_from(&mut *self.map.write().await, subscriber, key))
    }

    async fn update(
        &self,
        subscriber: SubscriberId,
        key: &EntityKey,
        count: u64,
        checked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(update_in(
            &mut *self.map.write().await,
            subscriber,
            key,
            count,
            checked_at,
        ))
    }

    async fn all(&self) -> Result<SubscriptionMap, StoreError> {
        Ok(self.map.read().await.clone())
    }
}
