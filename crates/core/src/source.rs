//! Page sources and the shared long-lived acquisition handle
//!
//! A [`PageSource`] turns a [`Locator`] into a response body. Sources are
//! expensive (connection pool, cookie jar) and the target punishes bursts, so
//! the acquirer holds exactly one through [`SharedSource`]:
//!
//! - created lazily on first use by a [`SourceLauncher`]
//! - reused while [`PageSource::is_healthy`] holds, relaunched otherwise
//! - creation runs under an async mutex, concurrent callers wait for it
//! - torn down only by [`SharedSource::close`]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL};
use reqwest::StatusCode;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::entity::Locator;
use crate::error::AcquisitionError;

/// Browser-like user agent sent with every request
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Raw response for one locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

/// Something that can retrieve the body behind a locator
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch the resource behind `locator`
    async fn fetch(&self, locator: &Locator) -> Result<FetchedPage, AcquisitionError>;

    /// Whether the source can keep being reused
    fn is_healthy(&self) -> bool {
        true
    }

    /// Flag the source for relaunch on next use
    fn mark_unhealthy(&self) {}

    /// Release underlying resources
    async fn close(&self) {}
}

/// Factory for page sources
#[async_trait]
pub trait SourceLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn PageSource>, AcquisitionError>;
}

/// Owner of the single long-lived page source
pub struct SharedSource {
    launcher: Arc<dyn SourceLauncher>,
    slot: Mutex<Option<Arc<dyn PageSource>>>,
    launches: AtomicU64,
}

impl SharedSource {
    pub fn new(launcher: Arc<dyn SourceLauncher>) -> Self {
        Self {
            launcher,
            slot: Mutex::new(None),
            launches: AtomicU64::new(0),
        }
    }

    /// Current source, launching one if needed
    ///
    /// The slot lock is held across the launch, so a second caller arriving
    /// mid-launch waits and then reuses the new source.
    pub async fn get(&self) -> Result<Arc<dyn PageSource>, AcquisitionError> {
        let mut slot = self.slot.lock().await;

        if let Some(source) = slot.as_ref() {
            if source.is_healthy() {
                return Ok(Arc::clone(source));
            }
            debug!("Page source unhealthy, relaunching");
            source.close().await;
            *slot = None;
        }

        info!("Launching page source");
        let source = self.launcher.launch().await?;
        self.launches.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Arc::clone(&source));
        Ok(source)
    }

    /// Close the current source, if any. Idempotent.
    pub async fn close(&self) {
        let source = self.slot.lock().await.take();
        if let Some(source) = source {
            source.close().await;
            info!("Page source closed");
        }
    }

    /// Whether a source is currently held
    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Number of sources launched so far
    pub fn launch_count(&self) -> u64 {
        self.launches.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for SharedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSource")
            .field("launches", &self.launch_count())
            .finish()
    }
}

// ============================================================================
// HTTP page source
// ============================================================================

/// Settings for [`HttpPageSource`]
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// JSON catalog endpoint used for numeric category ids
    pub catalog_api_url: String,
    /// City the catalog is queried for
    pub city_id: String,
    pub user_agent: String,
    pub accept_language: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            catalog_api_url: "https://goldapple.ru/front/api/catalog/cards-list?locale=ru"
                .to_string(),
            // Moscow
            city_id: "0c5b2444-70a0-4932-980c-b4dc0d3f02b5".to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Page source backed by one `reqwest::Client` with a cookie jar
pub struct HttpPageSource {
    client: reqwest::Client,
    config: HttpSourceConfig,
    healthy: AtomicBool,
}

impl HttpPageSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self, AcquisitionError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&config.accept_language)
                .map_err(|e| AcquisitionError::http(format!("bad Accept-Language: {}", e)))?,
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AcquisitionError::http(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            healthy: AtomicBool::new(true),
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<FetchedPage, AcquisitionError> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();

        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            // A fresh cookie jar is the only thing that helps after this
            self.healthy.store(false, Ordering::Relaxed);
            warn!(url = %url, status = status.as_u16(), "Request rejected by anti-bot defense");
            return Err(AcquisitionError::blocked(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(AcquisitionError::http(format!("HTTP {}", status.as_u16())));
        }

        let body = response.text().await.map_err(map_reqwest_error)?;
        debug!(url = %url, bytes = body.len(), "Page fetched");

        Ok(FetchedPage {
            url: url.to_string(),
            body,
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, locator: &Locator) -> Result<FetchedPage, AcquisitionError> {
        match locator {
            Locator::Page { url } => self.send(self.client.get(url), url).await,
            Locator::Catalog { category_id } => {
                let payload = json!({
                    "categoryId": category_id,
                    "pageNumber": 1,
                    "pageSize": 1,
                    "filters": [],
                    "mode": "dynamic",
                    "cityId": self.config.city_id,
                    "cityDistrict": null,
                    "geoPolygons": [],
                    "regionId": self.config.city_id,
                });
                let request = self
                    .client
                    .post(&self.config.catalog_api_url)
                    .header(ACCEPT, "application/json, text/plain, */*")
                    .json(&payload);
                self.send(request, &self.config.catalog_api_url).await
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }

    async fn close(&self) {
        self.healthy.store(false, Ordering::Relaxed);
    }
}

fn map_reqwest_error(err: reqwest::Error) -> AcquisitionError {
    if err.is_timeout() {
        AcquisitionError::timeout(err.to_string())
    } else {
        AcquisitionError::http(err.to_string())
    }
}

/// Launches [`HttpPageSource`]s
#[derive(Debug, Clone, Default)]
pub struct HttpLauncher {
    config: HttpSourceConfig,
}

impl HttpLauncher {
    pub fn new(config: HttpSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceLauncher for HttpLauncher {
    async fn launch(&self) -> Result<Arc<dyn PageSource>, AcquisitionError> {
        Ok(Arc::new(HttpPageSource::new(self.config.clone())?))
    }
}
