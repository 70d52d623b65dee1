//! Store and SequenceStore behavior against a real Postgres instance.
//!
//! Run with: cargo test -p crawlmesh-store --features test-utils --test store_test

#![cfg(feature = "test-utils")]

use crawlmesh_store::{SequenceStore, Store};
use serde_json::{json, Value};

async fn test_store() -> (testcontainers::ContainerAsync<testcontainers::GenericImage>, Store) {
    let (container, pool) = crawlmesh_store::testutil::postgres_container().await;
    (container, Store::new(pool))
}

#[tokio::test]
async fn upsert_then_find_one_round_trips() {
    let (_container, store) = test_store().await;
    let feeds = store.collection::<Value>("feeds");

    feeds.upsert("https://example.org/f.xml", &json!({ "url": "https://example.org/f.xml" })).await.unwrap();

    let doc = feeds.find_one("https://example.org/f.xml").await.unwrap().unwrap();
    assert_eq!(doc.get("url").and_then(Value::as_str), Some("https://example.org/f.xml"));
}

#[tokio::test]
async fn find_one_on_missing_url_returns_none() {
    let (_container, store) = test_store().await;
    let feeds = store.collection::<Value>("feeds");
    assert!(feeds.find_one("https://example.org/missing.xml").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_replaces_the_whole_document() {
    let (_container, store) = test_store().await;
    let feeds = store.collection::<Value>("feeds");
    let url = "https://example.org/f.xml";

    feeds.upsert(url, &json!({ "url": url, "lang": "en" })).await.unwrap();
    feeds.upsert(url, &json!({ "url": url })).await.unwrap();

    let doc = feeds.find_one(url).await.unwrap().unwrap();
    assert!(doc.get("lang").is_none());
}

#[tokio::test]
async fn find_one_and_update_never_creates_a_missing_document() {
    let (_container, store) = test_store().await;
    let feeds = store.collection::<Value>("feeds");

    let result = feeds.find_one_and_update("https://example.org/missing.xml", |doc| doc).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn find_one_and_update_applies_the_transform_and_persists_it() {
    let (_container, store) = test_store().await;
    let feeds = store.collection::<Value>("feeds");
    let url = "https://example.org/f.xml";
    feeds.upsert(url, &json!({ "url": url, "count": 1 })).await.unwrap();

    let updated = feeds
        .find_one_and_update(url, |mut doc| {
            let n = doc.get("count").and_then(Value::as_i64).unwrap_or(0);
            doc["count"] = json!(n + 1);
            doc
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.get("count").and_then(Value::as_i64), Some(2));

    let reloaded = feeds.find_one(url).await.unwrap().unwrap();
    assert_eq!(reloaded.get("count").and_then(Value::as_i64), Some(2));
}

#[tokio::test]
async fn delete_removes_the_document() {
    let (_container, store) = test_store().await;
    let feeds = store.collection::<Value>("feeds");
    let url = "https://example.org/f.xml";
    feeds.upsert(url, &json!({ "url": url })).await.unwrap();

    feeds.delete(url).await.unwrap();
    assert!(feeds.find_one(url).await.unwrap().is_none());
}

#[tokio::test]
async fn scan_applies_the_in_rust_predicate_and_ignores_other_collections() {
    let (_container, store) = test_store().await;
    let feeds = store.collection::<Value>("feeds");
    let articles = store.collection::<Value>("articles");

    feeds.upsert("https://example.org/a.xml", &json!({ "lang": "en" })).await.unwrap();
    feeds.upsert("https://example.org/b.xml", &json!({ "lang": "fr" })).await.unwrap();
    articles.upsert("https://example.org/c", &json!({ "lang": "en" })).await.unwrap();

    let english = feeds.scan(|doc| doc.get("lang").and_then(Value::as_str) == Some("en")).await.unwrap();
    assert_eq!(english.len(), 1);
}

#[tokio::test]
async fn sequence_store_is_zero_indexed_and_strictly_increasing() {
    let (_container, store) = test_store().await;
    let sequences = SequenceStore::new(store.pool().clone());

    assert_eq!(sequences.next("article_id").await.unwrap(), 0);
    assert_eq!(sequences.next("article_id").await.unwrap(), 1);
    assert_eq!(sequences.next("article_id").await.unwrap(), 2);
}

#[tokio::test]
async fn sequence_store_keeps_independent_counters_per_id() {
    let (_container, store) = test_store().await;
    let sequences = SequenceStore::new(store.pool().clone());

    assert_eq!(sequences.next("article_id").await.unwrap(), 0);
    assert_eq!(sequences.next("image_id").await.unwrap(), 0);
    assert_eq!(sequences.next("article_id").await.unwrap(), 1);
}
