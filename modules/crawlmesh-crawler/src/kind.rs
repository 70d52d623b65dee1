//! `CrawlKind` — the per-subtype attributes and domain parse step the
//! generic resource crawler delegates to (spec §4.3). Three implementors:
//! `FeedKind`, `ArticleKind`, `ImageKind`. This is the "capability
//! interfaces composed via a plain struct" shape: a generic orchestration
//! shell parameterized over pluggable extraction.

use async_trait::async_trait;
use chrono::Utc;
use crawlmesh_broker::{Broker, Exchange};
use crawlmesh_common::CrawlMeshError;
use crawlmesh_fetch::{ContentKind, Contents};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Resources shared across the three subtypes are always just `ResourceMeta`
/// — the crawler never sees `Article`/`Feed`/`Image`'s domain-specific
/// fields. Those are populated downstream by the controller's reconciler
/// from the `updates` map each subtype returns.
use crawlmesh_common::types::ResourceMeta;

#[async_trait]
pub trait CrawlKind: Send + Sync {
    fn resource_type(&self) -> &'static str;
    fn source_exchange(&self) -> Exchange;
    fn content_kind(&self) -> ContentKind;

    /// Run the domain-specific parse step over freshly-fetched contents and
    /// return the fields to merge into `updates`. May publish follow-up
    /// broker messages as a side effect (feed entries, scrape jobs).
    async fn crawl(
        &self,
        broker: &Broker,
        resource: &ResourceMeta,
        contents: &Contents,
        headers: &HashMap<String, String>,
    ) -> Result<Map<String, Value>, CrawlMeshError>;
}

/// Parses RSS/Atom, publishes a `save_article` job per entry link.
pub struct FeedKind;

#[async_trait]
impl CrawlKind for FeedKind {
    fn resource_type(&self) -> &'static str {
        "feed"
    }

    fn source_exchange(&self) -> Exchange {
        Exchange::Feeds
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Text
    }

    async fn crawl(
        &self,
        broker: &Broker,
        resource: &ResourceMeta,
        contents: &Contents,
        _headers: &HashMap<String, String>,
    ) -> Result<Map<String, Value>, CrawlMeshError> {
        let Contents::Text(text) = contents else {
            return Err(CrawlMeshError::Protocol("feed contents were not text".to_string()));
        };

        let feed = feed_rs::parser::parse(text.as_bytes())
            .map_err(|e| CrawlMeshError::Protocol(format!("feed parse failed: {e}")))?;

        // First two characters of the feed-level language, falling back to
        // the resource's own language, then "en".
        let lang = feed
            .language
            .as_deref()
            .map(|l| l.chars().take(2).collect::<String>())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| resource.lang.clone());

        let publisher = broker.publisher(Exchange::Articles);
        for entry in &feed.entries {
            let Some(link) = entry.links.first() else { continue };
            publisher
                .publish(
                    "save_article",
                    json!({ "article": { "url": link.href, "lang": lang } }),
                )
                .await
                .map_err(|e| CrawlMeshError::Broker(e.to_string()))?;
        }

        Ok(Map::new())
    }
}

/// Attaches fetched contents to the resource and hands it to the scraper via
/// a `scrape_article` job; no parsing happens here (scraping is an external
/// collaborator).
pub struct ArticleKind;

#[async_trait]
impl CrawlKind for ArticleKind {
    fn resource_type(&self) -> &'static str {
        "article"
    }

    fn source_exchange(&self) -> Exchange {
        Exchange::Articles
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Text
    }

    async fn crawl(
        &self,
        broker: &Broker,
        resource: &ResourceMeta,
        contents: &Contents,
        _headers: &HashMap<String, String>,
    ) -> Result<Map<String, Value>, CrawlMeshError> {
        let Contents::Text(text) = contents else {
            return Err(CrawlMeshError::Protocol("article contents were not text".to_string()));
        };

        let mut to_scrape = resource.clone();
        to_scrape.url = resource.canonical_url.clone().unwrap_or_else(|| resource.url.clone());

        broker
            .publisher(Exchange::Articles)
            .publish(
                "scrape_article",
                json!({ "resource": to_scrape, "contents": text, "crawled_at": Utc::now() }),
            )
            .await
            .map_err(|e| CrawlMeshError::Broker(e.to_string()))?;

        let mut updates = Map::new();
        updates.insert("contents".to_string(), Value::String(text.clone()));
        Ok(updates)
    }
}

/// Stores the raw bytes on the resource; images have no downstream publish.
pub struct ImageKind;

#[async_trait]
impl CrawlKind for ImageKind {
    fn resource_type(&self) -> &'static str {
        "image"
    }

    fn source_exchange(&self) -> Exchange {
        Exchange::Images
    }

    fn content_kind(&self) -> ContentKind {
        ContentKind::Binary
    }

    async fn crawl(
        &self,
        _broker: &Broker,
        _resource: &ResourceMeta,
        contents: &Contents,
        headers: &HashMap<String, String>,
    ) -> Result<Map<String, Value>, CrawlMeshError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let Contents::Binary(bytes) = contents else {
            return Err(CrawlMeshError::Protocol("image contents were not binary".to_string()));
        };

        let mut updates = Map::new();
        updates.insert("contents".to_string(), Value::String(STANDARD.encode(bytes)));
        if let Some(content_type) = headers.get("content-type") {
            updates.insert("content_type".to_string(), Value::String(content_type.clone()));
        }
        Ok(updates)
    }
}
