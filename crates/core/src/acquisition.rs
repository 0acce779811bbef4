//! Value acquisition: fetch, extract, validate, retry
//!
//! One acquisition is up to `max_attempts` attempts. An attempt fetches the
//! entity's locator through the shared page source and runs the extractor
//! chain over the body. A zero or non-numeric reading is an *invalid* attempt
//! (short backoff); a blocked page, timeout, missing marker or transport error
//! is a *failed* attempt (long backoff). No wait follows the last attempt.
//!
//! Fetches are serialized across all callers: commands and sweeps share one
//! page source, and the target punishes parallel requests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::entity::TrackedEntity;
use crate::error::AcquisitionError;
use crate::extract::{Confidence, Extraction, ExtractorChain};
use crate::retry::RetryPolicy;
use crate::source::{SharedSource, SourceLauncher};

/// A validated count for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionResult {
    pub count: u64,
    pub timestamp: DateTime<Utc>,
    pub source_url: String,
    pub confidence: Confidence,
    /// Attempt (1-based) that produced the count
    pub attempts: u32,
}

/// Outcome of a single attempt that did not fail outright
enum Reading {
    Valid {
        count: u64,
        confidence: Confidence,
        source_url: String,
    },
    Invalid(String),
}

/// Obtains current counts with bounded retry
pub struct Acquirer {
    source: SharedSource,
    extractors: ExtractorChain,
    policy: RetryPolicy,
    /// One permit: a single fetch in flight at a time
    fetch_permits: Semaphore,
}

impl Acquirer {
    /// Acquirer with the standard extractor chain and default retry policy
    pub fn new(launcher: Arc<dyn SourceLauncher>) -> Self {
        Self {
            source: SharedSource::new(launcher),
            extractors: ExtractorChain::standard(),
            policy: RetryPolicy::default(),
            fetch_permits: Semaphore::new(1),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The shared page source
    pub fn source(&self) -> &SharedSource {
        &self.source
    }

    /// Release the shared page source
    pub async fn close(&self) {
        self.source.close().await;
    }

    /// Acquire the current count for `entity`
    ///
    /// Fails with the last observed failure once the retry budget is spent;
    /// that is `InvalidCount` when every attempt returned an unusable count.
    #[instrument(skip(self, entity), fields(entity = %entity.key))]
    pub async fn acquire(
        &self,
        entity: &TrackedEntity,
    ) -> Result<AcquisitionResult, AcquisitionError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, locator = %entity.locator.describe(), "Fetching product count");

            let delay = match self.attempt(entity).await {
                Ok(Reading::Valid {
                    count,
                    confidence,
                    source_url,
                }) => {
                    info!(count, attempt, ?confidence, "Product count acquired");
                    return Ok(AcquisitionResult {
                        count,
                        timestamp: Utc::now(),
                        source_url,
                        confidence,
                        attempts: attempt,
                    });
                }
                Ok(Reading::Invalid(detail)) => {
                    warn!(attempt, detail = %detail, "Invalid product count, retrying");
                    last_error = Some(AcquisitionError::invalid_count(detail));
                    self.policy.invalid_count_backoff.delay_after(attempt)
                }
                Err(e) => {
                    warn!(attempt, reason = %e.reason(), error = %e, "Acquisition attempt failed");
                    last_error = Some(e);
                    self.policy.error_backoff.delay_after(attempt)
                }
            };

            if self.policy.has_attempts_remaining(attempt) {
                debug!(delay_ms = delay.as_millis() as u64, "Waiting before retry");
                tokio::time::sleep(delay).await;
            }
        }

        warn!(max_attempts, "All acquisition attempts failed");
        Err(last_error.unwrap_or_else(|| {
            AcquisitionError::invalid_count("no valid count after all retries")
        }))
    }

    async fn attempt(&self, entity: &TrackedEntity) -> Result<Reading, AcquisitionError> {
        let _permit = self
            .fetch_permits
            .acquire()
            .await
            .map_err(|_| AcquisitionError::http("acquirer shut down"))?;

        let source = self.source.get().await?;
        let timeout = self.policy.attempt_timeout;

        let page = tokio::time::timeout(timeout, source.fetch(&entity.locator))
            .await
            .map_err(|_| {
                AcquisitionError::timeout(format!("no response within {}s", timeout.as_secs()))
            })??;

        match self.extractors.extract(&page.body) {
            Extraction::Blocked => {
                // Relaunch with a clean session before the next attempt
                source.mark_unhealthy();
                Err(AcquisitionError::blocked("the site detected automation"))
            }
            Extraction::NotFound => Err(AcquisitionError::parse(format!(
                "no count marker in response from {}",
                page.url
            ))),
            Extraction::Malformed { raw, strategy } => Ok(Reading::Invalid(format!(
                "{} returned non-numeric value {:?}",
                strategy, raw
            ))),
            Extraction::Count { value: 0, strategy, .. } => {
                Ok(Reading::Invalid(format!("{} returned 0", strategy)))
            }
            Extraction::Count {
                value,
                confidence,
                strategy,
            } => {
                debug!(value, strategy, "Count extracted");
                Ok(Reading::Valid {
                    count: value,
                    confidence,
                    source_url: page.url,
                })
            }
        }
    }
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquirer")
            .field("extractors", &self.extractors)
            .field("policy", &self.policy)
            .finish()
    }
}
