//! Direct coverage for the pre/post scrape-articles hooks: site upsert,
//! icon-crawl publication, and the NEW_ARTICLE event publish.

use crawlmesh_broker::Broker;
use crawlmesh_common::types::{Collection, Status, UpdateType};
use crawlmesh_controller::hooks::{run_post_hook, run_pre_hook};
use crawlmesh_store::Store;
use serde_json::{json, Map, Value};

async fn test_env() -> (testcontainers::ContainerAsync<testcontainers::GenericImage>, Store, Broker) {
    let (container, pool) = crawlmesh_store::testutil::postgres_container().await;
    crawlmesh_broker::migrate(&pool).await.expect("broker migrate failed");
    let store = Store::new(pool.clone());
    let broker = Broker::from_pool(pool);
    (container, store, broker)
}

#[tokio::test]
async fn pre_scrape_hook_upserts_site_and_queues_icon_crawl() {
    let (_container, store, broker) = test_env().await;

    let mut updates = Map::new();
    updates.insert(
        "site".to_string(),
        json!({ "url": "https://example.org", "name": "Example", "icon_url": "https://example.org/favicon.ico" }),
    );

    let status = Status::ok(chrono::Utc::now());
    let out = run_pre_hook(&store, &broker, UpdateType::Scrape, Collection::Articles, None, &status, &updates)
        .await
        .unwrap();

    assert_eq!(out.get("article_id").and_then(Value::as_i64), Some(0));
    assert_eq!(out.get("site").and_then(Value::as_str), Some("https://example.org"));

    let sites = store.collection::<Value>(Collection::Sites.as_str());
    let site_doc = sites.find_one("https://example.org").await.unwrap().unwrap();
    assert_eq!(site_doc.get("icon_url").and_then(Value::as_str), Some("https://example.org/favicon.ico"));

    let images = store.collection::<Value>(Collection::Images.as_str());
    assert!(images.find_one("https://example.org/favicon.ico").await.unwrap().is_some());

    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM queue_messages WHERE exchange = 'images' AND routing_key = 'crawl_image'",
    )
    .fetch_one(broker.pool())
    .await
    .unwrap();
    assert_eq!(row.0, 1);
}

#[tokio::test]
async fn pre_scrape_hook_does_not_reassign_an_existing_article_id() {
    let (_container, store, broker) = test_env().await;

    let current = json!({ "article_id": 42 });
    let status = Status::ok(chrono::Utc::now());
    let out = run_pre_hook(
        &store,
        &broker,
        UpdateType::Scrape,
        Collection::Articles,
        Some(&current),
        &status,
        &Map::new(),
    )
    .await
    .unwrap();

    assert!(out.get("article_id").is_none());
}

#[tokio::test]
async fn pre_scrape_hook_is_skipped_entirely_on_failure_status() {
    let (_container, store, broker) = test_env().await;

    let mut updates = Map::new();
    updates.insert(
        "site".to_string(),
        json!({ "url": "https://example.org", "name": "Example", "icon_url": "https://example.org/favicon.ico" }),
    );
    let status = Status::err(chrono::Utc::now(), "fetch_error", "boom");

    let out = run_pre_hook(&store, &broker, UpdateType::Scrape, Collection::Articles, None, &status, &updates)
        .await
        .unwrap();

    assert!(out.is_empty());

    let sites = store.collection::<Value>(Collection::Sites.as_str());
    assert!(sites.find_one("https://example.org").await.unwrap().is_none());

    let images = store.collection::<Value>(Collection::Images.as_str());
    assert!(images.find_one("https://example.org/favicon.ico").await.unwrap().is_none());

    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM queue_messages WHERE exchange = 'images' AND routing_key = 'crawl_image'",
    )
    .fetch_one(broker.pool())
    .await
    .unwrap();
    assert_eq!(row.0, 0);
}

#[tokio::test]
async fn post_scrape_hook_publishes_new_article_event_with_site_joined_in() {
    let (_container, store, broker) = test_env().await;

    let sites = store.collection::<Value>(Collection::Sites.as_str());
    sites
        .upsert("https://example.org", &json!({ "url": "https://example.org", "name": "Example" }))
        .await
        .unwrap();

    let doc = json!({
        "url": "https://example.org/a",
        "article_id": 1,
        "site": "https://example.org",
        "contents": "<html></html>",
    });

    run_post_hook(&store, &broker, UpdateType::Scrape, Collection::Articles, &doc, &Status::ok(chrono::Utc::now()))
        .await
        .unwrap();

    let row: (Value,) = sqlx::query_as(
        "SELECT payload FROM queue_messages WHERE exchange = 'event_stream' AND routing_key = 'event'",
    )
    .fetch_one(broker.pool())
    .await
    .unwrap();

    assert_eq!(row.0.get("type").and_then(Value::as_str), Some("NEW_ARTICLE"));
    let payload = row.0.get("payload").unwrap();
    assert!(payload.get("contents").is_none());
    assert_eq!(
        payload.get("site").and_then(|s| s.get("name")).and_then(Value::as_str),
        Some("Example")
    );
}

#[tokio::test]
async fn post_scrape_hook_skips_publishing_on_failure_status() {
    let (_container, store, broker) = test_env().await;

    let doc = json!({ "url": "https://example.org/a" });
    let status = Status::err(chrono::Utc::now(), "fetch_error", "boom");

    run_post_hook(&store, &broker, UpdateType::Scrape, Collection::Articles, &doc, &status)
        .await
        .unwrap();

    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM queue_messages WHERE exchange = 'event_stream'")
        .fetch_one(broker.pool())
        .await
        .unwrap();
    assert_eq!(row.0, 0);
}
