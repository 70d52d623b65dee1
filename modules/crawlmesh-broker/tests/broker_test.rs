//! Exercises the Postgres-backed queue end to end: publish/dequeue,
//! ack/nack-requeue/reject-drop resolution, and the correlation-id-based
//! request/response RPC round trip.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crawlmesh_broker::{Broker, Exchange, HandlerOutcome, RpcClient, RpcEndpoint};
use serde_json::json;

async fn test_broker() -> (testcontainers::ContainerAsync<testcontainers::GenericImage>, Broker) {
    let (container, pool) = crawlmesh_store::testutil::postgres_container().await;
    crawlmesh_broker::migrate(&pool).await.expect("broker migrate failed");
    (container, Broker::from_pool(pool))
}

#[tokio::test]
async fn published_message_is_delivered_once_and_acked() {
    let (_container, broker) = test_broker().await;
    let seen = Arc::new(AtomicUsize::new(0));

    broker
        .publisher(Exchange::Feeds)
        .publish("crawl_feed", json!({ "url": "https://example.org/feed.xml" }))
        .await
        .unwrap();

    let worker = broker.worker(Exchange::Feeds, "crawl_feed");
    let handle = {
        let seen = seen.clone();
        tokio::spawn(async move {
            worker
                .run(move |delivery| {
                    let seen = seen.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(delivery.routing_key, "crawl_feed");
                        HandlerOutcome::Ack
                    }
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.abort();

    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let row: (i64,) = sqlx::query_as("SELECT count(*) FROM queue_messages WHERE exchange = 'feeds'")
        .fetch_one(broker.pool())
        .await
        .unwrap();
    assert_eq!(row.0, 0, "acked message should have been deleted");
}

#[tokio::test]
async fn nack_requeue_makes_the_message_visible_again() {
    let (_container, broker) = test_broker().await;

    broker
        .publisher(Exchange::Images)
        .publish("crawl_image", json!({ "url": "https://example.org/a.png" }))
        .await
        .unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let worker = broker.worker(Exchange::Images, "crawl_image");
    let handle = {
        let attempts = attempts.clone();
        tokio::spawn(async move {
            worker
                .run(move |_delivery| {
                    let attempts = attempts.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            HandlerOutcome::NackRequeue
                        } else {
                            HandlerOutcome::Ack
                        }
                    }
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(700)).await;
    handle.abort();

    assert!(attempts.load(Ordering::SeqCst) >= 2, "message should have been redelivered after nack");
}

#[tokio::test]
async fn reject_drop_leaves_the_message_out_of_the_pending_pool() {
    let (_container, broker) = test_broker().await;

    broker
        .publisher(Exchange::Articles)
        .publish("crawl_article", json!({ "url": "https://example.org/a" }))
        .await
        .unwrap();

    let worker = broker.worker(Exchange::Articles, "crawl_article");
    let handle = tokio::spawn(async move {
        worker.run(|_delivery| async { HandlerOutcome::RejectDrop }).await
    });

    tokio::time::sleep(Duration::from_millis(400)).await;
    handle.abort();

    let row: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM queue_messages WHERE exchange = 'articles' AND status = 'pending'",
    )
    .fetch_one(broker.pool())
    .await
    .unwrap();
    assert_eq!(row.0, 0);

    let rejected: (i64,) = sqlx::query_as(
        "SELECT count(*) FROM queue_messages WHERE exchange = 'articles' AND status = 'rejected'",
    )
    .fetch_one(broker.pool())
    .await
    .unwrap();
    assert_eq!(rejected.0, 1);
}

#[tokio::test]
async fn rpc_client_receives_the_endpoint_reply() {
    let (_container, broker) = test_broker().await;

    let endpoint = RpcEndpoint::new(broker.clone(), Exchange::ControllerRpc);
    let handle = tokio::spawn(async move {
        endpoint
            .run(|method, params| async move {
                assert_eq!(method, "ping");
                json!({ "method": method, "echo": params })
            })
            .await
    });

    let client = RpcClient::new(broker, Exchange::ControllerRpc, Duration::from_secs(5));
    let reply = client.call("ping", json!({ "nonce": 7 })).await.unwrap();

    handle.abort();

    assert_eq!(reply.get("method").and_then(|v| v.as_str()), Some("ping"));
    assert_eq!(reply.get("echo").and_then(|v| v.get("nonce")).and_then(|v| v.as_i64()), Some(7));
}

#[tokio::test]
async fn rpc_client_times_out_when_nothing_services_the_exchange() {
    let (_container, broker) = test_broker().await;
    let client = RpcClient::new(broker, Exchange::ControllerRpc, Duration::from_millis(200));

    let result = client.call("ping", json!({})).await;
    assert!(result.is_err());
}
