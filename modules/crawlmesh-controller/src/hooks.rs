//! `pre_{type}_{collection}` / `post_{type}_{collection}` dispatch (spec
//! §4.5). Only the articles/scrape pair does anything; every other
//! combination is a no-op, matched explicitly rather than silently skipped
//! so a new hook is easy to find a home for.

use chrono::Utc;
use crawlmesh_broker::{Broker, Exchange};
use crawlmesh_common::types::{Collection, Status, UpdateType};
use crawlmesh_common::CrawlMeshError;
use crawlmesh_store::Store;
use serde_json::{json, Map, Value};
use tracing::warn;

/// Run the pre-hook for `(update_type, collection)`, if any, against the
/// document's state *before* the update is applied. Returns additional
/// fields to merge into the update set. Runs only when `status.ok`; a
/// failed crawl/scrape must not assign ids, upsert sites, or queue
/// follow-on jobs.
pub async fn run_pre_hook(
    store: &Store,
    broker: &Broker,
    update_type: UpdateType,
    collection: Collection,
    current: Option<&Value>,
    status: &Status,
    updates: &Map<String, Value>,
) -> Result<Map<String, Value>, CrawlMeshError> {
    if !status.is_ok() {
        return Ok(Map::new());
    }
    match (update_type, collection) {
        (UpdateType::Scrape, Collection::Articles) => {
            pre_scrape_articles(store, broker, current, updates).await
        }
        _ => Ok(Map::new()),
    }
}

/// Run the post-hook for `(update_type, collection)`, if any, against the
/// document's state *after* the update was applied.
pub async fn run_post_hook(
    store: &Store,
    broker: &Broker,
    update_type: UpdateType,
    collection: Collection,
    doc: &Value,
    status: &Status,
) -> Result<(), CrawlMeshError> {
    match (update_type, collection) {
        (UpdateType::Scrape, Collection::Articles) => {
            post_scrape_articles(store, broker, doc, status).await
        }
        _ => Ok(()),
    }
}

/// Assigns the monotonic `article_id` on first successful scrape, upserts
/// the owning site document (crawling its icon if needed), and rewrites
/// `updates.site` down to the site's own url — the stand-in for a
/// document id in a url-keyed store.
async fn pre_scrape_articles(
    store: &Store,
    broker: &Broker,
    current: Option<&Value>,
    updates: &Map<String, Value>,
) -> Result<Map<String, Value>, CrawlMeshError> {
    let mut out = Map::new();

    let has_article_id = current
        .and_then(|d| d.get("article_id"))
        .map(|v| !v.is_null())
        .unwrap_or(false);
    if !has_article_id {
        let sequences = crawlmesh_store::SequenceStore::new(store.pool().clone());
        let seq = sequences
            .next("article_id")
            .await
            .map_err(|e| CrawlMeshError::Store(e.to_string()))?;
        out.insert("article_id".to_string(), json!(seq));
    }

    if let Some(Value::Object(site)) = updates.get("site") {
        let mut site = site.clone();
        let site_url = site
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| CrawlMeshError::Invariant("scrape update site has no url".to_string()))?
            .to_string();

        if let Some(icon_url) = site.get("icon_url").and_then(Value::as_str).map(str::to_string) {
            let resolved = maybe_crawl_image(store, broker, &icon_url).await?;
            site.insert("icon_resource_id".to_string(), json!(resolved));
            site.insert("icon_url".to_string(), json!(resolved));
        }

        let sites = store.collection::<Value>(Collection::Sites.as_str());
        sites
            .upsert(&site_url, &Value::Object(site))
            .await
            .map_err(|e| CrawlMeshError::Store(e.to_string()))?;

        out.insert("site".to_string(), json!(site_url));
    }

    Ok(out)
}

/// Upserts an image document for `url` if one doesn't exist, publishing a
/// `crawl_image` job when it still has no contents. Returns the image's
/// own url, the store's stand-in for a document id.
async fn maybe_crawl_image(store: &Store, broker: &Broker, url: &str) -> Result<String, CrawlMeshError> {
    let images = store.collection::<Value>(Collection::Images.as_str());

    let existing = images
        .find_one(url)
        .await
        .map_err(|e| CrawlMeshError::Store(e.to_string()))?;

    let needs_crawl = match &existing {
        Some(doc) => doc.get("contents").map(Value::is_null).unwrap_or(true),
        None => true,
    };

    if existing.is_none() {
        let doc = json!({ "url": url, "lang": "en" });
        images
            .upsert(url, &doc)
            .await
            .map_err(|e| CrawlMeshError::Store(e.to_string()))?;
    }

    if needs_crawl {
        broker
            .publisher(Exchange::Images)
            .publish("crawl_image", json!({ "url": url, "lang": "en" }))
            .await
            .map_err(|e| CrawlMeshError::Broker(e.to_string()))?;
    }

    Ok(url.to_string())
}

/// Publishes `NEW_ARTICLE` to the fanout exchange with the site document
/// joined in and `contents` stripped.
async fn post_scrape_articles(
    store: &Store,
    broker: &Broker,
    doc: &Value,
    status: &Status,
) -> Result<(), CrawlMeshError> {
    if !status.is_ok() {
        return Ok(());
    }

    let mut article = doc.clone();
    if let Value::Object(map) = &mut article {
        map.remove("contents");

        if let Some(site_url) = map.get("site").and_then(Value::as_str).map(str::to_string) {
            let sites = store.collection::<Value>(Collection::Sites.as_str());
            match sites.find_one(&site_url).await {
                Ok(Some(site_doc)) => {
                    map.insert("site".to_string(), site_doc);
                }
                Ok(None) => warn!(site = %site_url, "post_scrape_articles: site document missing"),
                Err(e) => warn!(site = %site_url, error = %e, "post_scrape_articles: site lookup failed"),
            }
        }
    }

    broker
        .publisher(Exchange::EventStream)
        .publish(
            "event",
            json!({ "type": "NEW_ARTICLE", "payload": article, "at": Utc::now() }),
        )
        .await
        .map_err(|e| CrawlMeshError::Broker(e.to_string()))?;

    Ok(())
}
