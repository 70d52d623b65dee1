//! Three independent periodic sweeps — feeds/crawl, articles/crawl,
//! articles/scrape — each scanning the store for due resources and
//! publishing crawl jobs, deduped against the in-flight set (spec §4.4).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crawlmesh_broker::{Broker, Exchange};
use crawlmesh_common::types::{Collection, ResourceMeta, UpdateType};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::inflight::{InflightKey, InflightSet};

pub struct Scheduler {
    store: crawlmesh_store::Store,
    broker: Broker,
    inflight: Arc<InflightSet>,
}

impl Scheduler {
    pub fn new(store: crawlmesh_store::Store, broker: Broker, inflight: Arc<InflightSet>) -> Self {
        Self { store, broker, inflight }
    }

    /// Spawns the three sweep loops; returns once all three tasks have been
    /// launched (the loops themselves run forever).
    pub fn spawn(
        self: Arc<Self>,
        crawl_feeds_rate: Duration,
        crawl_articles_rate: Duration,
        scrape_articles_rate: Duration,
    ) {
        let this = self.clone();
        tokio::spawn(async move { this.sweep_loop(InflightKey { update_type: UpdateType::Crawl, collection: Collection::Feeds }, crawl_feeds_rate, sweep_feeds_crawl).await });

        let this = self.clone();
        tokio::spawn(async move { this.sweep_loop(InflightKey { update_type: UpdateType::Crawl, collection: Collection::Articles }, crawl_articles_rate, sweep_articles_crawl).await });

        let this = self;
        tokio::spawn(async move { this.sweep_loop(InflightKey { update_type: UpdateType::Scrape, collection: Collection::Articles }, scrape_articles_rate, sweep_articles_scrape).await });
    }

    async fn sweep_loop<F>(&self, key: InflightKey, refresh_rate: Duration, select: F)
    where
        F: Fn(&Value, DateTime<Utc>) -> bool,
    {
        loop {
            let since = Utc::now() - ChronoDuration::from_std(refresh_rate).unwrap_or(ChronoDuration::zero());
            if let Err(e) = self.sweep_once(key, since, &select).await {
                warn!(error = %e, collection = %key.collection, update_type = %key.update_type, "sweep failed");
            }
            tokio::time::sleep(refresh_rate).await;
        }
    }

    async fn sweep_once<F>(&self, key: InflightKey, since: DateTime<Utc>, select: &F) -> anyhow::Result<()>
    where
        F: Fn(&Value, DateTime<Utc>) -> bool,
    {
        let coll = self.store.collection::<Value>(key.collection.as_str());
        let mut due = coll.scan(|doc| select(doc, since)).await?;

        if key.collection == Collection::Articles {
            due.sort_by_key(|doc| std::cmp::Reverse(last_seen(doc)));
        }

        let routing_key = format!("crawl_{}", singular(key.collection));
        let publisher = self.broker.publisher(exchange_for(key.collection));

        let mut published = 0usize;
        for doc in &due {
            let Some(url) = doc.get("url").and_then(Value::as_str) else { continue };
            if !self.inflight.try_insert(key, url) {
                continue;
            }

            let resource: ResourceMeta = match serde_json::from_value(doc.clone()) {
                Ok(r) => r,
                Err(e) => {
                    warn!(url, error = %e, "sweep: document doesn't parse as a resource, skipping");
                    self.inflight.remove(key, url);
                    continue;
                }
            };

            if key.update_type == UpdateType::Scrape {
                // Scrape jobs are serviced by an external scraper, not this
                // crawler fleet; publish the raw document instead of a
                // ResourceMeta-shaped payload.
                publisher.publish("scrape_article", doc.clone()).await?;
            } else {
                publisher.publish(&routing_key, serde_json::to_value(&resource)?).await?;
            }
            published += 1;
        }

        if published > 0 {
            info!(collection = %key.collection, update_type = %key.update_type, published, "sweep published jobs");
        }

        Ok(())
    }
}

fn last_seen(doc: &Value) -> DateTime<Utc> {
    doc.get("last_seen")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn crawl_status_when(doc: &Value) -> Option<DateTime<Utc>> {
    doc.get("crawl_status")
        .and_then(|s| s.get("when"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn scrape_status_when(doc: &Value) -> Option<DateTime<Utc>> {
    doc.get("scrape_status")
        .and_then(|s| s.get("when"))
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn sweep_feeds_crawl(doc: &Value, since: DateTime<Utc>) -> bool {
    let is_redirect = doc.get("is_redirect").and_then(Value::as_bool).unwrap_or(false);
    if is_redirect {
        return false;
    }
    match crawl_status_when(doc) {
        None => true,
        Some(when) => when <= since,
    }
}

fn sweep_articles_crawl(doc: &Value, _since: DateTime<Utc>) -> bool {
    let has_contents = doc.get("contents").map(|v| !v.is_null()).unwrap_or(false);
    !has_contents && crawl_status_when(doc).is_none()
}

fn sweep_articles_scrape(doc: &Value, _since: DateTime<Utc>) -> bool {
    let has_contents = doc.get("contents").map(|v| !v.is_null()).unwrap_or(false);
    has_contents && scrape_status_when(doc).is_none()
}

fn singular(collection: Collection) -> &'static str {
    match collection {
        Collection::Feeds => "feed",
        Collection::Articles => "article",
        Collection::Images => "image",
        Collection::Sites => "site",
        Collection::Recsystems => "recsystem",
    }
}

fn exchange_for(collection: Collection) -> Exchange {
    match collection {
        Collection::Feeds => Exchange::Feeds,
        Collection::Articles => Exchange::Articles,
        Collection::Images => Exchange::Images,
        Collection::Sites | Collection::Recsystems => Exchange::ControllerRpc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn feed_with_no_crawl_status_is_due() {
        assert!(sweep_feeds_crawl(&json!({ "url": "https://example.org/f.xml" }), Utc::now()));
    }

    #[test]
    fn feed_crawled_before_the_cutoff_is_due() {
        let doc = json!({ "crawl_status": { "when": "2020-01-01T00:00:00Z" } });
        assert!(sweep_feeds_crawl(&doc, Utc::now()));
    }

    #[test]
    fn feed_crawled_after_the_cutoff_is_not_due() {
        let since = Utc::now() - ChronoDuration::hours(1);
        let doc = json!({ "crawl_status": { "when": Utc::now().to_rfc3339() } });
        assert!(!sweep_feeds_crawl(&doc, since));
    }

    #[test]
    fn redirected_feed_is_never_due() {
        let doc = json!({ "is_redirect": true });
        assert!(!sweep_feeds_crawl(&doc, Utc::now()));
    }

    #[test]
    fn article_without_contents_and_uncrawled_is_due_for_crawl() {
        let doc = json!({ "url": "https://example.org/a" });
        assert!(sweep_articles_crawl(&doc, Utc::now()));
    }

    #[test]
    fn article_with_contents_is_not_due_for_crawl() {
        let doc = json!({ "contents": "<html></html>" });
        assert!(!sweep_articles_crawl(&doc, Utc::now()));
    }

    #[test]
    fn article_with_contents_and_unscraped_is_due_for_scrape() {
        let doc = json!({ "contents": "<html></html>" });
        assert!(sweep_articles_scrape(&doc, Utc::now()));
    }

    #[test]
    fn article_already_scraped_is_not_due_for_scrape() {
        let doc = json!({ "contents": "<html></html>", "scrape_status": { "when": "2020-01-01T00:00:00Z" } });
        assert!(!sweep_articles_scrape(&doc, Utc::now()));
    }

    #[test]
    fn article_without_contents_is_not_due_for_scrape() {
        let doc = json!({ "url": "https://example.org/a" });
        assert!(!sweep_articles_scrape(&doc, Utc::now()));
    }

    #[test]
    fn singular_and_exchange_mappings_cover_every_collection() {
        assert_eq!(singular(Collection::Feeds), "feed");
        assert_eq!(singular(Collection::Articles), "article");
        assert_eq!(singular(Collection::Images), "image");
        assert!(matches!(exchange_for(Collection::Feeds), Exchange::Feeds));
        assert!(matches!(exchange_for(Collection::Articles), Exchange::Articles));
        assert!(matches!(exchange_for(Collection::Sites), Exchange::ControllerRpc));
    }
}
