// Integration tests for Tracker and Scheduler
//
// A scripted page source stands in for the site, the in-memory subscription
// store and a recording sender stand in for persistence and the chat.
//
// Run with: cargo test -p shelfwatch-core --test sweep_test

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shelfwatch_core::extract::ACCESS_RESTRICTED_MARKER;
use shelfwatch_core::notifier::RecordingSender;
use shelfwatch_core::{
    AcquisitionError, Acquirer, Catalog, Clock, CountLedger, EntityKey, FetchedPage,
    InMemorySubscriptionStore, Locator, Notifier, PageSource, PutOutcome, RequestSpacing,
    RetryPolicy, Scheduler, SchedulerConfig, SourceLauncher, SubscriberId, Subscription,
    SubscriptionStore, TrackedEntity, Tracker, TrackerError,
};
use tempfile::TempDir;

/// Serves a fixed body per locator
#[derive(Default)]
struct FakeSite {
    bodies: Mutex<HashMap<String, String>>,
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    panics: AtomicBool,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeSite {
    fn set_count(&self, locator: &Locator, count: u64) {
        self.set_body(
            locator,
            format!(
                r#"<div class="catalog" data-category-products-count="{}"></div>"#,
                count
            ),
        );
    }

    fn set_blocked(&self, locator: &Locator) {
        self.set_body(locator, format!("<h1>{}</h1>", ACCESS_RESTRICTED_MARKER));
    }

    fn set_body(&self, locator: &Locator, body: String) {
        self.bodies
            .lock()
            .unwrap()
            .insert(locator.describe(), body);
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn set_panics(&self, panics: bool) {
        self.panics.store(panics, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most fetches ever in flight at once
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource for FakeSite {
    async fn fetch(&self, locator: &Locator) -> Result<FetchedPage, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panics.load(Ordering::SeqCst) {
            panic!("site exploded");
        }
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let body = self
            .bodies
            .lock()
            .unwrap()
            .get(&locator.describe())
            .cloned()
            .ok_or_else(|| AcquisitionError::http("HTTP 404"))?;
        Ok(FetchedPage {
            url: locator.describe(),
            body,
        })
    }
}

struct SiteLauncher(Arc<FakeSite>);

#[async_trait]
impl SourceLauncher for SiteLauncher {
    async fn launch(&self) -> Result<Arc<dyn PageSource>, AcquisitionError> {
        Ok(self.0.clone())
    }
}

struct Harness {
    tracker: Arc<Tracker>,
    site: Arc<FakeSite>,
    store: Arc<InMemorySubscriptionStore>,
    sender: Arc<RecordingSender>,
    _data: TempDir,
}

fn entity(key: &str) -> TrackedEntity {
    TrackedEntity::page(key, key.to_uppercase(), format!("https://shop.test/brands/{}", key))
}

fn harness(entities: Vec<TrackedEntity>) -> Harness {
    harness_with_policy(entities, RetryPolicy::default())
}

fn harness_with_policy(entities: Vec<TrackedEntity>, policy: RetryPolicy) -> Harness {
    let data = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default());
    let store = Arc::new(InMemorySubscriptionStore::new());
    let sender = Arc::new(RecordingSender::new());

    let acquirer = Acquirer::new(Arc::new(SiteLauncher(site.clone()))).with_policy(policy);
    let tracker = Tracker::new(
        Arc::new(Catalog::from_entities(entities)),
        store.clone(),
        Arc::new(CountLedger::new(data.path())),
        Arc::new(acquirer),
        Notifier::new(sender.clone()),
    )
    .with_request_spacing(RequestSpacing::none());

    Harness {
        tracker: Arc::new(tracker),
        site,
        store,
        sender,
        _data: data,
    }
}

async fn seed(store: &InMemorySubscriptionStore, subscriber: i64, entity: &TrackedEntity, count: u64) {
    store
        .seed(
            SubscriberId(subscriber),
            Subscription::new(entity, count, Utc::now()),
        )
        .await;
}

// ============================================================================
// Sweep
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sweep_continues_past_failing_entity() {
    let (a, b, c) = (entity("a"), entity("b"), entity("c"));
    let h = harness(vec![a.clone(), b.clone(), c.clone()]);
    seed(&h.store, 1, &a, 10).await;
    seed(&h.store, 1, &b, 20).await;
    seed(&h.store, 1, &c, 30).await;
    seed(&h.store, 2, &c, 25).await;

    h.site.set_count(&a.locator, 12);
    h.site.set_blocked(&b.locator);
    h.site.set_count(&c.locator, 30);

    let report = h.tracker.sweep().await;

    assert_eq!(report.entities_checked, 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, EntityKey::new("b"));
    assert_eq!(report.changed, vec![EntityKey::new("a"), EntityKey::new("c")]);

    // Subscriber 1 hears about A only; C did not change from its point of view
    assert_eq!(
        h.sender.sent_to(SubscriberId(1)).await,
        vec!["📈 A:\nwas: 10 items\nnow: 12 items\nchange: +2 (+20%)".to_string()]
    );
    // Subscriber 2 had an older value for C
    assert_eq!(
        h.sender.sent_to(SubscriberId(2)).await,
        vec!["📈 C:\nwas: 25 items\nnow: 30 items\nchange: +5 (+20%)".to_string()]
    );

    // Every subscription of an acquired entity is updated, changed or not
    let all = h.store.all().await.unwrap();
    let one = &all[&SubscriberId(1)];
    assert_eq!(one[&EntityKey::new("a")].last_product_count, 12);
    assert!(one[&EntityKey::new("c")].last_checked.is_some());
    assert_eq!(one[&EntityKey::new("b")].last_product_count, 20);
    assert!(one[&EntityKey::new("b")].last_checked.is_none());
    assert_eq!(all[&SubscriberId(2)][&EntityKey::new("c")].last_product_count, 30);

    assert_eq!(h.tracker.last_sweep().await, Some(report));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_acquires_each_entity_once() {
    let a = entity("a");
    let h = harness(vec![a.clone()]);
    for subscriber in 1..=5 {
        seed(&h.store, subscriber, &a, 7).await;
    }
    h.site.set_count(&a.locator, 8);

    let report = h.tracker.sweep().await;

    assert_eq!(h.site.calls(), 1);
    assert_eq!(report.notifications_sent, 5);
    let sent = h.sender.sent().await;
    assert!(sent.iter().all(|(_, text)| text == &sent[0].1));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_without_change_sends_nothing() {
    let a = entity("a");
    let h = harness(vec![a.clone()]);
    seed(&h.store, 1, &a, 40).await;
    h.site.set_count(&a.locator, 40);

    let report = h.tracker.sweep().await;

    assert!(report.changed.is_empty());
    assert!(h.sender.sent().await.is_empty());
    let sub = h
        .store
        .get(SubscriberId(1), &EntityKey::new("a"))
        .await
        .unwrap()
        .unwrap();
    assert!(sub.last_checked.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failure_does_not_stop_sweep() {
    let (a, b) = (entity("a"), entity("b"));
    let h = harness(vec![a.clone(), b.clone()]);
    seed(&h.store, 1, &a, 1).await;
    seed(&h.store, 2, &a, 1).await;
    seed(&h.store, 1, &b, 1).await;
    h.sender.fail_for(SubscriberId(1)).await;
    h.site.set_count(&a.locator, 2);
    h.site.set_count(&b.locator, 3);

    let report = h.tracker.sweep().await;

    assert_eq!(report.entities_checked, 2);
    assert_eq!(report.notifications_sent, 1);
    assert_eq!(report.notification_failures, 2);
    assert_eq!(h.sender.sent_to(SubscriberId(2)).await.len(), 1);
}

// ============================================================================
// Tracker operations
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_subscribe_is_idempotent() {
    let a = entity("a");
    let h = harness(vec![a.clone()]);
    h.site.set_count(&a.locator, 15);

    let first = h.tracker.subscribe(SubscriberId(9), &a.key).await.unwrap();
    assert!(first.was_created());
    assert_eq!(first.subscription().last_product_count, 15);

    h.site.set_count(&a.locator, 99);
    let second = h.tracker.subscribe(SubscriberId(9), &a.key).await.unwrap();
    assert!(matches!(second, PutOutcome::AlreadySubscribed(ref s) if s.last_product_count == 15));

    // No acquisition for the duplicate, and still exactly one record
    assert_eq!(h.site.calls(), 1);
    assert_eq!(h.tracker.subscriptions(SubscriberId(9)).await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_unknown_entity() {
    let h = harness(vec![entity("a")]);
    let err = h
        .tracker
        .subscribe(SubscriberId(1), &EntityKey::new("nope"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_numeric_id_uses_catalog_locator() {
    let h = harness(vec![]);
    h.site.set_body(
        &Locator::Catalog {
            category_id: 1000001798,
        },
        r#"{"data":{"productCount":250}}"#.to_string(),
    );

    let outcome = h
        .tracker
        .subscribe(SubscriberId(1), &EntityKey::new("1000001798"))
        .await
        .unwrap();
    assert_eq!(outcome.subscription().last_product_count, 250);
    assert_eq!(
        outcome.subscription().entity.locator,
        Locator::Catalog {
            category_id: 1000001798
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_leaves_no_record() {
    let a = entity("a");
    let h = harness_with_policy(vec![a.clone()], RetryPolicy::no_retry());
    h.site.set_blocked(&a.locator);

    let err = h.tracker.subscribe(SubscriberId(1), &a.key).await.unwrap_err();
    assert!(matches!(
        err,
        TrackerError::Acquisition(AcquisitionError::Blocked(_))
    ));
    assert!(h.store.all().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe() {
    let a = entity("a");
    let h = harness(vec![a.clone()]);
    seed(&h.store, 1, &a, 3).await;

    h.tracker.unsubscribe(SubscriberId(1), &a.key).await.unwrap();
    let err = h
        .tracker
        .unsubscribe(SubscriberId(1), &a.key)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(h.store.all().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_all_collects_failures() {
    let (a, b, c) = (entity("a"), entity("b"), entity("c"));
    let h = harness_with_policy(vec![a.clone(), b.clone(), c.clone()], RetryPolicy::no_retry());
    seed(&h.store, 4, &a, 1).await;
    h.site.set_blocked(&b.locator);
    h.site.set_count(&c.locator, 5);

    let report = h.tracker.subscribe_all(SubscriberId(4)).await;

    assert_eq!(report.already_subscribed.len(), 1);
    assert_eq!(report.subscribed.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, EntityKey::new("b"));
    assert_eq!(report.success_count(), 2);
    assert_eq!(report.total(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_all_spaces_requests() {
    let (a, b, c) = (entity("a"), entity("b"), entity("c"));
    let data = tempfile::tempdir().unwrap();
    let site = Arc::new(FakeSite::default());
    for e in [&a, &b, &c] {
        site.set_count(&e.locator, 1);
    }
    let spacing = RequestSpacing {
        min: Duration::from_secs(3),
        max: Duration::from_secs(3),
    };
    let tracker = Tracker::new(
        Arc::new(Catalog::from_entities(vec![a, b, c])),
        Arc::new(InMemorySubscriptionStore::new()),
        Arc::new(CountLedger::new(data.path())),
        Arc::new(Acquirer::new(Arc::new(SiteLauncher(site)))),
        Notifier::new(Arc::new(RecordingSender::new())),
    )
    .with_request_spacing(spacing);

    let start = tokio::time::Instant::now();
    let report = tracker.subscribe_all(SubscriberId(1)).await;

    assert_eq!(report.subscribed.len(), 3);
    // Two pauses between three acquisitions
    assert!(start.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_check_one_reports_against_ledger() {
    let a = entity("a");
    let h = harness(vec![a.clone()]);
    h.site.set_count(&a.locator, 100);

    let first = h.tracker.check_one(&a.key).await.unwrap();
    assert_eq!(first.previous, None);
    assert_eq!(first.message(), "📊 A: 100 items (first check)");

    h.site.set_count(&a.locator, 150);
    let second = h.tracker.check_one(&a.key).await.unwrap();
    assert_eq!(second.previous, Some(100));
    assert!(second.comparison.increased);
    assert_eq!(second.comparison.percent_change, 50.0);

    let third = h.tracker.check_one(&a.key).await.unwrap();
    assert_eq!(third.message(), "📊 A: no change (150 items)");
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_checks_reach_the_site_one_at_a_time() {
    let (a, b) = (entity("a"), entity("b"));
    let h = harness(vec![a.clone(), b.clone()]);
    seed(&h.store, 1, &b, 1).await;
    h.site.set_count(&a.locator, 10);
    h.site.set_count(&b.locator, 20);
    h.site.set_delay(Duration::from_secs(5));

    let start = tokio::time::Instant::now();
    let (first, second, sweep) = tokio::join!(
        h.tracker.check_one(&a.key),
        h.tracker.check_one(&b.key),
        h.tracker.sweep(),
    );

    assert!(first.is_ok() && second.is_ok());
    assert_eq!(sweep.entities_checked, 1);
    assert_eq!(h.site.calls(), 3);
    assert_eq!(h.site.peak(), 1);
    assert!(start.elapsed() >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn test_check_all_keeps_going() {
    let (a, b) = (entity("a"), entity("b"));
    let h = harness_with_policy(vec![a.clone(), b.clone()], RetryPolicy::no_retry());
    h.site.set_blocked(&a.locator);
    h.site.set_count(&b.locator, 4);

    let results = h.tracker.check_all().await;

    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_err());
    assert_eq!(results[1].1.as_ref().unwrap().result.count, 4);
}

#[tokio::test]
async fn test_status_counts_subscriptions() {
    let (a, b) = (entity("a"), entity("b"));
    let h = harness(vec![a.clone(), b.clone()]);
    seed(&h.store, 1, &a, 1).await;

    let status = h.tracker.status(SubscriberId(1)).await.unwrap();
    assert_eq!(status.entities, 2);
    assert_eq!(status.subscriptions, 1);
    assert!(status.last_sweep.is_none());
}

// ============================================================================
// Scheduler
// ============================================================================

/// Wall clock that moves with tokio's paused clock, plus a manual offset
struct TestClock {
    base: DateTime<Utc>,
    origin: tokio::time::Instant,
    offset: Mutex<chrono::Duration>,
}

impl TestClock {
    /// Step the wall clock without any tokio time passing
    fn jump(&self, by: chrono::Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap();
        self.base + elapsed + *self.offset.lock().unwrap()
    }
}

fn noon_thirty() -> Arc<TestClock> {
    Arc::new(TestClock {
        base: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap(),
        origin: tokio::time::Instant::now(),
        offset: Mutex::new(chrono::Duration::zero()),
    })
}

/// Sleep until `secs` after the test started
async fn until(origin: tokio::time::Instant, secs: u64) {
    tokio::time::sleep_until(origin + Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_start_stop_start() {
    let a = entity("a");
    let h = harness(vec![a.clone()]);
    h.site.set_count(&a.locator, 1);
    h.tracker.acquirer().acquire(&a).await.unwrap();
    assert!(h.tracker.acquirer().source().is_open().await);

    let origin = tokio::time::Instant::now();
    let scheduler = Scheduler::with_clock(h.tracker.clone(), SchedulerConfig::default(), noon_thirty());

    scheduler.start().await;
    assert!(scheduler.is_running().await);
    until(origin, 3).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 1);

    scheduler.stop().await;
    assert!(!scheduler.is_running().await);
    assert!(!h.tracker.acquirer().source().is_open().await);
    scheduler.stop().await;

    // 12:05:00 passes while stopped
    until(origin, 5 * 60).await;
    assert_eq!(scheduler.status().await.sweeps_started, 1);

    // Restarted at 12:05:30: start-up sweep, then 12:10:00 and 12:15:00
    scheduler.start().await;
    assert!(scheduler.is_running().await);
    until(origin, 5 * 60 + 10).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 2);
    until(origin, 9 * 60 + 20).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 2);
    until(origin, 9 * 60 + 40).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 3);
    until(origin, 14 * 60 + 40).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 4);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_second_start_is_noop() {
    let h = harness(vec![]);
    let origin = tokio::time::Instant::now();
    let scheduler = Scheduler::with_clock(h.tracker.clone(), SchedulerConfig::default(), noon_thirty());

    scheduler.start().await;
    scheduler.start().await;
    until(origin, 3).await;

    // One loop, one start-up sweep
    assert_eq!(scheduler.status().await.sweeps_started, 1);

    // Exactly one sweep per boundary: 12:05:00 and 12:10:00
    until(origin, 4 * 60 + 40).await;
    assert_eq!(scheduler.status().await.sweeps_started, 2);
    until(origin, 9 * 60 + 40).await;
    let status = scheduler.status().await;
    assert_eq!(status.sweeps_started, 3);
    assert_eq!(status.sweeps_completed, 3);
    assert_eq!(status.sweeps_skipped, 0);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_aligns_to_boundaries() {
    let h = harness(vec![]);
    let scheduler = Scheduler::with_clock(h.tracker.clone(), SchedulerConfig::default(), noon_thirty());
    scheduler.start().await;

    // Start-up sweep after 2s
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 1);

    // 12:05:00 is 4m30s after start
    tokio::time::sleep(Duration::from_secs(4 * 60 + 20)).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 2);

    // Then every 5 minutes
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 3);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_non_dividing_period_restarts_at_hour() {
    let h = harness(vec![]);
    let origin = tokio::time::Instant::now();
    let clock = Arc::new(TestClock {
        base: Utc.with_ymd_and_hms(2024, 3, 1, 12, 49, 30).unwrap(),
        origin,
        offset: Mutex::new(chrono::Duration::zero()),
    });
    let config = SchedulerConfig::default().with_interval_minutes(7);
    let scheduler = Scheduler::with_clock(h.tracker.clone(), config, clock);
    scheduler.start().await;

    // 12:56:00 is 6m30s away, then 13:00:00 only 4 minutes later
    until(origin, 6 * 60 + 40).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 2);
    until(origin, 10 * 60 + 20).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 2);
    until(origin, 10 * 60 + 40).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 3);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_realigns_after_clock_step() {
    let h = harness(vec![]);
    let origin = tokio::time::Instant::now();
    let clock = noon_thirty();
    let scheduler = Scheduler::with_clock(h.tracker.clone(), SchedulerConfig::default(), clock.clone());
    scheduler.start().await;
    until(origin, 3).await;

    // Wall clock steps 2 minutes ahead; the pending wait still ends 4m30s in,
    // which now reads 12:07:00
    clock.jump(chrono::Duration::minutes(2));
    until(origin, 4 * 60 + 40).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 2);

    // Next sweep lands on 12:10:00 wall time, 3 minutes later
    until(origin, 7 * 60 + 20).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 2);
    until(origin, 7 * 60 + 40).await;
    assert_eq!(scheduler.status().await.sweeps_completed, 3);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_recovers_from_panicking_sweep() {
    let a = entity("a");
    let h = harness(vec![a.clone()]);
    seed(&h.store, 1, &a, 1).await;
    h.site.set_count(&a.locator, 2);
    h.site.set_panics(true);

    let origin = tokio::time::Instant::now();
    let scheduler = Scheduler::with_clock(h.tracker.clone(), SchedulerConfig::default(), noon_thirty());
    scheduler.start().await;

    until(origin, 3).await;
    let status = scheduler.status().await;
    assert_eq!(status.sweeps_started, 1);
    assert_eq!(status.sweeps_completed, 0);
    assert!(!scheduler.sweep_in_progress());

    // The 12:05:00 tick runs instead of being skipped
    h.site.set_panics(false);
    until(origin, 4 * 60 + 40).await;
    let status = scheduler.status().await;
    assert_eq!(status.sweeps_started, 2);
    assert_eq!(status.sweeps_completed, 1);
    assert_eq!(status.sweeps_skipped, 0);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_skips_tick_during_sweep() {
    let a = entity("a");
    let policy = RetryPolicy::default().with_attempt_timeout(Duration::from_secs(30 * 60));
    let h = harness_with_policy(vec![a.clone()], policy);
    seed(&h.store, 1, &a, 1).await;
    h.site.set_count(&a.locator, 2);
    h.site.set_delay(Duration::from_secs(7 * 60));

    let scheduler = Scheduler::with_clock(h.tracker.clone(), SchedulerConfig::default(), noon_thirty());
    scheduler.start().await;

    // Start-up sweep runs from 2s to ~7m02s, the 4m30s boundary lands inside it
    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    let status = scheduler.status().await;
    assert!(scheduler.sweep_in_progress());
    assert_eq!(status.sweeps_started, 1);
    assert_eq!(status.sweeps_skipped, 1);

    scheduler.stop().await;
}
