//! Reconciler integration tests against a real Postgres instance (spec §8:
//! invariants around `update_resource`'s redirect fork and the
//! article-scrape hook pair).

use std::sync::Arc;
use std::time::Duration;

use crawlmesh_broker::Broker;
use crawlmesh_common::types::{Collection, Status, UpdateType};
use crawlmesh_controller::{InflightSet, ReconcileInput, Reconciler};
use crawlmesh_store::Store;
use serde_json::{json, Map, Value};

async fn test_env() -> (testcontainers::ContainerAsync<testcontainers::GenericImage>, Store, Broker) {
    let (container, pool) = crawlmesh_store::testutil::postgres_container().await;
    crawlmesh_broker::migrate(&pool).await.expect("broker migrate failed");
    let store = Store::new(pool.clone());
    let broker = Broker::from_pool(pool);
    (container, store, broker)
}

fn reconciler(store: Store, broker: Broker) -> Reconciler {
    Reconciler::new(store, broker, Arc::new(InflightSet::new()))
}

#[tokio::test]
async fn update_resource_stamps_status_and_stats_on_existing_doc() {
    let (_container, store, broker) = test_env().await;

    let feeds = store.collection::<Value>(Collection::Feeds.as_str());
    feeds
        .upsert("https://example.org/feed.xml", &json!({ "url": "https://example.org/feed.xml" }))
        .await
        .unwrap();

    let rec = reconciler(store.clone(), broker);
    rec.reconcile(ReconcileInput {
        collection: Collection::Feeds,
        url: "https://example.org/feed.xml".to_string(),
        update_type: UpdateType::Crawl,
        status: Status::ok(chrono::Utc::now()),
        updates: Map::new(),
    })
    .await
    .unwrap();

    let doc = feeds.find_one("https://example.org/feed.xml").await.unwrap().unwrap();
    assert!(doc.get("crawl_status").is_some());
    let stats = doc.get("crawl_stats").unwrap();
    assert_eq!(stats.get("success_count").and_then(Value::as_i64), Some(1));
}

#[tokio::test]
async fn update_resource_on_missing_doc_warns_and_returns_ok() {
    let (_container, store, broker) = test_env().await;
    let rec = reconciler(store, broker);

    let result = rec
        .reconcile(ReconcileInput {
            collection: Collection::Feeds,
            url: "https://example.org/missing.xml".to_string(),
            update_type: UpdateType::Crawl,
            status: Status::ok(chrono::Utc::now()),
            updates: Map::new(),
        })
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn redirect_forks_the_document_under_the_canonical_url() {
    let (_container, store, broker) = test_env().await;

    let articles = store.collection::<Value>(Collection::Articles.as_str());
    articles
        .upsert(
            "https://example.org/old-path",
            &json!({ "url": "https://example.org/old-path", "lang": "en" }),
        )
        .await
        .unwrap();

    let mut updates = Map::new();
    updates.insert("canonical_url".to_string(), json!("https://example.org/new-path"));

    let rec = reconciler(store.clone(), broker);
    rec.reconcile(ReconcileInput {
        collection: Collection::Articles,
        url: "https://example.org/old-path".to_string(),
        update_type: UpdateType::Crawl,
        status: Status::ok(chrono::Utc::now()),
        updates,
    })
    .await
    .unwrap();

    let original = articles.find_one("https://example.org/old-path").await.unwrap().unwrap();
    assert_eq!(original.get("is_redirect").and_then(Value::as_bool), Some(true));

    let canonical = articles.find_one("https://example.org/new-path").await.unwrap().unwrap();
    assert_eq!(canonical.get("is_redirect").and_then(Value::as_bool), Some(false));
    assert_eq!(canonical.get("url").and_then(Value::as_str), Some("https://example.org/new-path"));
}

#[tokio::test]
async fn scrape_assigns_article_id_once_and_never_reassigns_it() {
    let (_container, store, broker) = test_env().await;

    let articles = store.collection::<Value>(Collection::Articles.as_str());
    articles
        .upsert("https://example.org/a", &json!({ "url": "https://example.org/a", "lang": "en" }))
        .await
        .unwrap();

    let rec = reconciler(store.clone(), broker.clone());
    let mut updates = Map::new();
    updates.insert("contents".to_string(), json!("<html></html>"));

    rec.reconcile(ReconcileInput {
        collection: Collection::Articles,
        url: "https://example.org/a".to_string(),
        update_type: UpdateType::Scrape,
        status: Status::ok(chrono::Utc::now()),
        updates: updates.clone(),
    })
    .await
    .unwrap();

    let after_first = articles.find_one("https://example.org/a").await.unwrap().unwrap();
    let first_id = after_first.get("article_id").and_then(Value::as_i64);
    assert!(first_id.is_some());

    let rec2 = reconciler(store.clone(), broker);
    rec2.reconcile(ReconcileInput {
        collection: Collection::Articles,
        url: "https://example.org/a".to_string(),
        update_type: UpdateType::Scrape,
        status: Status::ok(chrono::Utc::now()),
        updates,
    })
    .await
    .unwrap();

    let after_second = articles.find_one("https://example.org/a").await.unwrap().unwrap();
    assert_eq!(after_second.get("article_id").and_then(Value::as_i64), first_id);
}

#[tokio::test]
async fn failed_scrape_with_partial_updates_assigns_no_id_and_upserts_no_site() {
    let (_container, store, broker) = test_env().await;

    let articles = store.collection::<Value>(Collection::Articles.as_str());
    articles
        .upsert("https://example.org/a", &json!({ "url": "https://example.org/a" }))
        .await
        .unwrap();

    let mut updates = Map::new();
    updates.insert(
        "site".to_string(),
        json!({ "url": "https://example.org", "name": "Example", "icon_url": "https://example.org/favicon.ico" }),
    );

    let rec = reconciler(store.clone(), broker.clone());
    rec.reconcile(ReconcileInput {
        collection: Collection::Articles,
        url: "https://example.org/a".to_string(),
        update_type: UpdateType::Scrape,
        status: Status::err(chrono::Utc::now(), "fetch_error", "boom"),
        updates,
    })
    .await
    .unwrap();

    let doc = articles.find_one("https://example.org/a").await.unwrap().unwrap();
    assert!(doc.get("article_id").is_none());
    assert!(doc.get("site").is_none());

    let sites = store.collection::<Value>(Collection::Sites.as_str());
    assert!(sites.find_one("https://example.org").await.unwrap().is_none());

    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM queue_messages WHERE exchange = 'images' AND routing_key = 'crawl_image'",
    )
    .fetch_one(broker.pool())
    .await
    .unwrap();
    assert_eq!(row.0, 0);
}
