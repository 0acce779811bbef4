// Product-count tracking core
//
// This crate polls category pages for product-count changes and notifies
// subscribers. It knows nothing about the chat platform.
//
// Key design decisions:
// - Acquisition goes through a PageSource trait held in one shared, lazily
//   created handle; extraction is an ordered chain of CountExtractor strategies
// - Change detection is a pure function (Comparison::compare)
// - Persistence sits behind the SubscriptionStore trait (JSON file or in-memory)
// - Delivery sits behind the MessageSender trait
// - Tracker bundles the operations the command surface needs
// - Scheduler aligns sweeps to wall-clock boundaries and never overlaps them

pub mod acquisition;
pub mod detector;
pub mod entity;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod notifier;
pub mod retry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod tracker;

mod fsutil;

// Re-exports for convenience
pub use acquisition::{AcquisitionResult, Acquirer};
pub use detector::Comparison;
pub use entity::{Catalog, EntityKey, Locator, TrackedEntity};
pub use error::{AcquisitionError, AcquisitionReason, Result, StoreError, TrackerError};
pub use extract::{Confidence, CountExtractor, Extraction, ExtractorChain};
pub use ledger::{CountLedger, CountRecord, HistoryEntry};
pub use notifier::{format_message, DeliveryError, MessageSender, Notifier, NotifyReport};
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{Clock, Scheduler, SchedulerConfig, SchedulerStatus, SystemClock};
pub use source::{
    FetchedPage, HttpLauncher, HttpPageSource, HttpSourceConfig, PageSource, SharedSource,
    SourceLauncher,
};
pub use store::{
    InMemorySubscriptionStore, JsonSubscriptionStore, PutOutcome, SubscriberId, Subscription,
    SubscriptionStore,
};
pub use tracker::{
    BulkSubscribeReport, CheckReport, RequestSpacing, SweepReport, Tracker, TrackerStatus,
};
