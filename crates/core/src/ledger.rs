// Count ledger: last observed count per entity plus a capped history
//
// Independent of subscriptions. `/check` reads its previous value from here and
// every successful acquisition is recorded here.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entity::EntityKey;
use crate::error::StoreError;
use crate::fsutil;

/// Maximum history entries kept per entity
pub const HISTORY_LIMIT: usize = 100;

const COUNTS_FILE: &str = "category-counts.json";

/// Last observed count of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountRecord {
    pub count: u64,
    pub timestamp: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// One point of an entity's count history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub count: u64,
    pub timestamp: DateTime<Utc>,
}

/// File-backed ledger rooted at the data directory
///
/// Layout: `category-counts.json` holds every entity's last record,
/// `<key>-history.json` holds one entity's history, oldest first.
#[derive(Debug)]
pub struct CountLedger {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl CountLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn counts_path(&self) -> PathBuf {
        self.dir.join(COUNTS_FILE)
    }

    fn history_path(&self, key: &EntityKey) -> PathBuf {
        self.dir.join(format!("{}-history.json", key))
    }

    /// Last recorded count for `key`
    pub async fn get_last(&self, key: &EntityKey) -> Result<Option<CountRecord>, StoreError> {
        Ok(self.load_counts().await?.remove(key))
    }

    /// History of `key`, oldest first
    pub async fn history(&self, key: &EntityKey) -> Result<Vec<HistoryEntry>, StoreError> {
        let path = self.history_path(key);
        match fsutil::read_json::<Vec<HistoryEntry>>(&path).await {
            Ok(history) => Ok(history.unwrap_or_default()),
            Err(StoreError::Serialization(e)) => {
                warn!(path = %path.display(), error = %e, "History file is corrupt, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Store `count` as the latest value and append it to the history
    pub async fn record(
        &self,
        key: &EntityKey,
        count: u64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut counts = self.load_counts().await?;
        counts.insert(
            key.clone(),
            CountRecord {
                count,
                timestamp: at,
                last_updated: at,
            },
        );
        fsutil::write_json(&self.counts_path(), &counts).await?;

        let mut history: VecDeque<HistoryEntry> = self.history(key).await?.into();
        history.push_back(HistoryEntry {
            count,
            timestamp: at,
        });
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
        fsutil::write_json(&self.history_path(key), &history).await?;

        debug!(entity = %key, count, history_len = history.len(), "Count recorded");
        Ok(())
    }

    async fn load_counts(&self) -> Result<BTreeMap<EntityKey, CountRecord>, StoreError> {
        let path = self.counts_path();
        match fsutil::read_json(&path).await {
            Ok(counts) => Ok(counts.unwrap_or_default()),
            Err(StoreError::Serialization(e)) => {
                warn!(path = %path.display(), error = %e, "Counts file is corrupt, starting empty");
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e),
        }
    }
}
