//! Count extraction strategies
//!
//! A fetched page is run through an ordered chain of [`CountExtractor`]s. The
//! first strategy that recognises something wins:
//!
//! 1. [`BlockedPageDetector`] - the anti-bot "access restricted" page
//! 2. [`JsonCountField`] - `data.productCount` in a JSON catalog response
//! 3. [`DataAttributeMarker`] - the `data-category-products-count` attribute
//! 4. [`LooseTextPattern`] - "<number> товаров" in visible text (degraded)

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Marker text served by the site when it decides the client is a bot
pub const ACCESS_RESTRICTED_MARKER: &str = "Доступ к сайту временно ограничен";

/// Attribute carrying the product count on category pages
pub const COUNT_ATTRIBUTE: &str = "data-category-products-count";

static DATA_ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"data-category-products-count\s*=\s*["']?([^"'\s>]*)"#)
        .expect("data attribute pattern is valid")
});

static LOOSE_TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*товар").expect("loose text pattern is valid"));

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<[^>]*>")
        .expect("markup pattern is valid")
});

/// How much a reading can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Read from a dedicated machine-readable marker
    Structured,
    /// Guessed from free text
    Degraded,
}

/// Result of running one strategy (or the whole chain) over a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// A numeric reading. Zero is returned as-is; the acquirer decides validity.
    Count {
        value: u64,
        confidence: Confidence,
        strategy: &'static str,
    },
    /// The marker was present but its value was not a number
    Malformed { raw: String, strategy: &'static str },
    /// The page is the anti-bot interstitial
    Blocked,
    /// This strategy found nothing
    NotFound,
}

/// A single way of locating the product count in a response body
pub trait CountExtractor: Send + Sync {
    /// Strategy name, used in logs
    fn name(&self) -> &'static str;

    /// Inspect a response body
    fn extract(&self, body: &str) -> Extraction;
}

/// Recognises the anti-bot interstitial page
#[derive(Debug, Clone, Default)]
pub struct BlockedPageDetector;

impl CountExtractor for BlockedPageDetector {
    fn name(&self) -> &'static str {
        "blocked_page"
    }

    fn extract(&self, body: &str) -> Extraction {
        if body.contains(ACCESS_RESTRICTED_MARKER) {
            Extraction::Blocked
        } else {
            Extraction::NotFound
        }
    }
}

/// Reads `data.productCount` from a JSON catalog response
#[derive(Debug, Clone, Default)]
pub struct JsonCountField;

impl CountExtractor for JsonCountField {
    fn name(&self) -> &'static str {
        "json_count_field"
    }

    fn extract(&self, body: &str) -> Extraction {
        let trimmed = body.trim_start();
        if !trimmed.starts_with('{') {
            return Extraction::NotFound;
        }
        let Ok(json) = serde_json::from_str::<serde_json::Value>(trimmed) else {
            return Extraction::NotFound;
        };
        match json.pointer("/data/productCount") {
            None => Extraction::NotFound,
            Some(value) => match value.as_u64() {
                Some(count) => Extraction::Count {
                    value: count,
                    confidence: Confidence::Structured,
                    strategy: self.name(),
                },
                None => Extraction::Malformed {
                    raw: value.to_string(),
                    strategy: self.name(),
                },
            },
        }
    }
}

/// Reads the `data-category-products-count` attribute from page markup
#[derive(Debug, Clone, Default)]
pub struct DataAttributeMarker;

impl CountExtractor for DataAttributeMarker {
    fn name(&self) -> &'static str {
        "data_attribute"
    }

    fn extract(&self, body: &str) -> Extraction {
        let Some(caps) = DATA_ATTRIBUTE_RE.captures(body) else {
            return Extraction::NotFound;
        };
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        match raw.parse::<u64>() {
            Ok(value) => Extraction::Count {
                value,
                confidence: Confidence::Structured,
                strategy: self.name(),
            },
            Err(_) => Extraction::Malformed {
                raw: raw.to_string(),
                strategy: self.name(),
            },
        }
    }
}

/// Falls back to "<number> товар..." anywhere in the visible text
#[derive(Debug, Clone, Default)]
pub struct LooseTextPattern;

impl CountExtractor for LooseTextPattern {
    fn name(&self) -> &'static str {
        "loose_text"
    }

    fn extract(&self, body: &str) -> Extraction {
        let text = MARKUP_RE.replace_all(body, " ");
        let Some(caps) = LOOSE_TEXT_RE.captures(&text) else {
            return Extraction::NotFound;
        };
        match caps[1].parse::<u64>() {
            Ok(value) => Extraction::Count {
                value,
                confidence: Confidence::Degraded,
                strategy: self.name(),
            },
            Err(_) => Extraction::Malformed {
                raw: caps[1].to_string(),
                strategy: self.name(),
            },
        }
    }
}

/// Ordered list of strategies
pub struct ExtractorChain {
    extractors: Vec<Box<dyn CountExtractor>>,
}

impl Default for ExtractorChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl ExtractorChain {
    /// Blocked detection, JSON field, data attribute, loose text
    pub fn standard() -> Self {
        Self::empty()
            .with(BlockedPageDetector)
            .with(JsonCountField)
            .with(DataAttributeMarker)
            .with(LooseTextPattern)
    }

    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Append a strategy at the end of the chain
    pub fn with(mut self, extractor: impl CountExtractor + 'static) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }

    /// Run strategies in order, returning the first non-`NotFound` outcome
    pub fn extract(&self, body: &str) -> Extraction {
        self.extractors
            .iter()
            .map(|e| e.extract(body))
            .find(|outcome| *outcome != Extraction::NotFound)
            .unwrap_or(Extraction::NotFound)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }
}

impl std::fmt::Debug for ExtractorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorChain")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div class="catalog" data-category-products-count="137">
        <span>Найдено 120 товаров</span>
        </div></body></html>"#;

    #[test]
    fn test_structured_marker_beats_loose_text() {
        let outcome = ExtractorChain::standard().extract(PAGE);
        assert_eq!(
            outcome,
            Extraction::Count {
                value: 137,
                confidence: Confidence::Structured,
                strategy: "data_attribute",
            }
        );
    }

    #[test]
    fn test_loose_text_fallback() {
        let page = "<html><body><h1>Brand</h1><p>Всего 58 Товаров</p></body></html>";
        let outcome = ExtractorChain::standard().extract(page);
        assert_eq!(
            outcome,
            Extraction::Count {
                value: 58,
                confidence: Confidence::Degraded,
                strategy: "loose_text",
            }
        );
    }

    #[test]
    fn test_loose_text_ignores_scripts() {
        let page = "<script>var x = '99 товаров';</script><p>нет данных</p>";
        assert_eq!(LooseTextPattern.extract(page), Extraction::NotFound);
    }

    #[test]
    fn test_blocked_page_wins() {
        let page = format!(
            "<html><body>{} <div data-category-products-count=\"5\"></div></body></html>",
            ACCESS_RESTRICTED_MARKER
        );
        assert_eq!(ExtractorChain::standard().extract(&page), Extraction::Blocked);
    }

    #[test]
    fn test_json_count_field() {
        let body = r#"{"data":{"productCount":321,"cardsCount":1}}"#;
        assert_eq!(
            ExtractorChain::standard().extract(body),
            Extraction::Count {
                value: 321,
                confidence: Confidence::Structured,
                strategy: "json_count_field",
            }
        );

        let body = r#"{"data":{"productCount":null}}"#;
        assert!(matches!(
            JsonCountField.extract(body),
            Extraction::Malformed { .. }
        ));
    }

    #[test]
    fn test_malformed_attribute() {
        let page = r#"<div data-category-products-count="abc"></div>"#;
        assert_eq!(
            DataAttributeMarker.extract(page),
            Extraction::Malformed {
                raw: "abc".to_string(),
                strategy: "data_attribute",
            }
        );
    }

    #[test]
    fn test_nothing_found() {
        let outcome = ExtractorChain::standard().extract("<html><body>empty</body></html>");
        assert_eq!(outcome, Extraction::NotFound);
    }

    #[test]
    fn test_standard_chain_order() {
        assert_eq!(
            ExtractorChain::standard().strategy_names(),
            vec!["blocked_page", "json_count_field", "data_attribute", "loose_text"]
        );
        assert_eq!(ExtractorChain::empty().extract(PAGE), Extraction::NotFound);
    }
}
