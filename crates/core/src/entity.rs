// Tracked entities and the category catalog
//
// One entity type covers both ways a category can be tracked: by a page URL whose
// HTML carries the product count, or by a numeric catalog id queried through the
// site's JSON catalog endpoint. Acquisition branches on the locator kind only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, StoreError, TrackerError};
use crate::fsutil;

/// Stable identifier of a tracked entity
///
/// A key made only of ASCII digits is a numeric catalog id, anything else is a
/// symbolic key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric catalog id, when the key is one
    pub fn category_id(&self) -> Option<u64> {
        if self.0.is_empty() || !self.0.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        self.0.parse().ok()
    }

    /// Keys are used in file names, so only `[A-Za-z0-9_-]` is accepted
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() || self.0.len() > 64 {
            return Err(TrackerError::invalid_entity(
                "key must be between 1 and 64 characters",
            ));
        }
        if !self
            .0
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TrackerError::invalid_entity(format!(
                "key \"{}\" may only contain letters, digits, '-' and '_'",
                self.0
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where the count for an entity is fetched from
///
/// Serialized as `{"categoryUrl": ...}` or `{"categoryId": ...}`, the field
/// names used inside subscription records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// Category or brand page carrying the count in its markup
    Page {
        #[serde(rename = "categoryUrl")]
        url: String,
    },
    /// Numeric id in the JSON catalog API
    Catalog {
        #[serde(rename = "categoryId")]
        category_id: u64,
    },
}

impl Locator {
    /// Short human-readable target, used in logs and listings
    pub fn describe(&self) -> String {
        match self {
            Self::Page { url } => url.clone(),
            Self::Catalog { category_id } => format!("catalog id {}", category_id),
        }
    }
}

/// A category whose product count is monitored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub key: EntityKey,
    pub display_name: String,
    pub locator: Locator,
}

impl TrackedEntity {
    /// Entity backed by a category page
    pub fn page(key: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: EntityKey::new(key),
            display_name: name.into(),
            locator: Locator::Page { url: url.into() },
        }
    }

    /// Entity backed by a numeric catalog id
    pub fn catalog(category_id: u64) -> Self {
        Self {
            key: EntityKey::new(category_id.to_string()),
            display_name: format!("Category {}", category_id),
            locator: Locator::Catalog { category_id },
        }
    }
}

/// Categories known out of the box
pub fn builtin_entities() -> Vec<TrackedEntity> {
    vec![
        TrackedEntity::page(
            "flacon-magazine",
            "Flacon Magazine",
            "https://goldapple.ru/brands/flacon-magazine",
        ),
        TrackedEntity::page(
            "goldapplebox",
            "goldapplebox",
            "https://goldapple.ru/brands/goldapplebox",
        ),
        TrackedEntity::page(
            "darling",
            "darling",
            "https://goldapple.ru/brands/darling/darling",
        ),
    ]
}

/// On-disk shape of an operator-added catalog entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogEntry {
    name: String,
    url: String,
}

/// Registry of symbolic entities
///
/// Built-in entities are always present. Operator-added entities are persisted
/// in the catalog file (when one is configured) and merged on load. Numeric ids
/// resolve on demand without being registered.
#[derive(Debug)]
pub struct Catalog {
    entities: RwLock<BTreeMap<EntityKey, TrackedEntity>>,
    path: Option<PathBuf>,
}

impl Catalog {
    /// Catalog with only the built-in entities and no backing file
    pub fn builtin() -> Self {
        Self::from_entities(builtin_entities())
    }

    /// In-memory catalog, useful for tests
    pub fn from_entities(entities: impl IntoIterator<Item = TrackedEntity>) -> Self {
        Self {
            entities: RwLock::new(entities.into_iter().map(|e| (e.key.clone(), e)).collect()),
            path: None,
        }
    }

    /// Load built-ins plus the operator entries stored at `path`
    ///
    /// A missing file is not an error. A corrupt file is logged and ignored so the
    /// bot still starts with the built-in catalog.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entities: BTreeMap<EntityKey, TrackedEntity> = builtin_entities()
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();

        match read_entries(&path).await {
            Ok(entries) => {
                for (key, entry) in entries {
                    let entity = TrackedEntity::page(key, entry.name, entry.url);
                    entities.insert(entity.key.clone(), entity);
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read catalog file, using built-in categories");
            }
        }

        info!(count = entities.len(), "Catalog loaded");

        Self {
            entities: RwLock::new(entities),
            path: Some(path),
        }
    }

    /// Resolve a key to an entity
    pub async fn resolve(&self, key: &EntityKey) -> Option<TrackedEntity> {
        if let Some(entity) = self.entities.read().await.get(key) {
            return Some(entity.clone());
        }
        key.category_id().map(TrackedEntity::catalog)
    }

    /// All registered entities, ordered by key
    pub async fn list(&self) -> Vec<TrackedEntity> {
        self.entities.read().await.values().cloned().collect()
    }

    /// Register a page-backed entity and persist it
    ///
    /// Re-adding an existing key updates its display metadata only. The entity
    /// becomes resolvable only once the catalog file has been written.
    pub async fn add(&self, key: EntityKey, name: String, url: String) -> Result<TrackedEntity> {
        key.validate()?;
        if key.category_id().is_some() {
            return Err(TrackerError::invalid_entity(
                "numeric keys are reserved for catalog ids",
            ));
        }
        let parsed = url::Url::parse(&url)
            .map_err(|e| TrackerError::invalid_entity(format!("bad url \"{}\": {}", url, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(TrackerError::invalid_entity("url must be http or https"));
        }

        let mut entities = self.entities.write().await;
        let entity = match entities.get(&key) {
            Some(existing) => TrackedEntity {
                display_name: name,
                ..existing.clone()
            },
            None => TrackedEntity::page(key.as_str(), name, url),
        };
        let mut next = entities.clone();
        next.insert(key, entity.clone());

        if let Some(path) = &self.path {
            let builtin: Vec<EntityKey> = builtin_entities().into_iter().map(|e| e.key).collect();
            let entries: BTreeMap<&EntityKey, CatalogEntry> = next
                .iter()
                .filter(|(k, _)| !builtin.contains(k))
                .filter_map(|(k, e)| match &e.locator {
                    Locator::Page { url } => Some((
                        k,
                        CatalogEntry {
                            name: e.display_name.clone(),
                            url: url.clone(),
                        },
                    )),
                    Locator::Catalog { .. } => None,
                })
                .collect();
            fsutil::write_json(path, &entries).await?;
        }
        *entities = next;

        info!(entity = %entity.key, "Category added to catalog");
        Ok(entity)
    }
}

async fn read_entries(
    path: &Path,
) -> std::result::Result<BTreeMap<String, CatalogEntry>, StoreError> {
    Ok(fsutil::read_json(path).await?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_key_detection() {
        assert_eq!(EntityKey::new("1000001798").category_id(), Some(1000001798));
        assert_eq!(EntityKey::new("darling").category_id(), None);
        assert_eq!(EntityKey::new("12a").category_id(), None);
        assert_eq!(EntityKey::new("").category_id(), None);
    }

    #[test]
    fn test_key_validation() {
        assert!(EntityKey::new("flacon-magazine").validate().is_ok());
        assert!(EntityKey::new("../etc/passwd").validate().is_err());
        assert!(EntityKey::new("").validate().is_err());
    }

    #[tokio::test]
    async fn test_resolve_builtin_and_numeric() {
        let catalog = Catalog::builtin();

        let darling = catalog.resolve(&EntityKey::new("darling")).await.unwrap();
        assert_eq!(
            darling.locator,
            Locator::Page {
                url: "https://goldapple.ru/brands/darling/darling".to_string()
            }
        );

        let numeric = catalog.resolve(&EntityKey::new("42")).await.unwrap();
        assert_eq!(numeric.locator, Locator::Catalog { category_id: 42 });

        assert!(catalog.resolve(&EntityKey::new("unknown")).await.is_none());
        assert_eq!(catalog.list().await.len(), 3);
    }

    #[tokio::test]
    async fn test_add_persists_custom_entities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let catalog = Catalog::load(&path).await;
        catalog
            .add(
                EntityKey::new("lipstick"),
                "Lipstick".to_string(),
                "https://goldapple.ru/makijazh/guby".to_string(),
            )
            .await
            .unwrap();

        let reloaded = Catalog::load(&path).await;
        let entity = reloaded.resolve(&EntityKey::new("lipstick")).await.unwrap();
        assert_eq!(entity.display_name, "Lipstick");
        assert_eq!(reloaded.list().await.len(), 4);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("lipstick"));
        assert!(!raw.contains("darling"));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_catalog_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let catalog = Catalog::load(blocker.join("catalog.json")).await;
        let err = catalog
            .add(
                EntityKey::new("lip"),
                "Lip".to_string(),
                "https://goldapple.ru/makijazh/guby".to_string(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TrackerError::Persistence(_)));
        assert!(catalog.resolve(&EntityKey::new("lip")).await.is_none());
        assert_eq!(catalog.list().await.len(), 3);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_input() {
        let catalog = Catalog::builtin();
        let bad_url = catalog
            .add(EntityKey::new("x"), "X".into(), "not a url".into())
            .await;
        assert!(matches!(bad_url, Err(TrackerError::InvalidEntity(_))));

        let numeric = catalog
            .add(EntityKey::new("123"), "X".into(), "https://example.com".into())
            .await;
        assert!(matches!(numeric, Err(TrackerError::InvalidEntity(_))));
    }
}
