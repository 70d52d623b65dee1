use std::sync::Arc;
use std::time::Duration;

use crawlmesh_broker::{Broker, Exchange, HandlerOutcome};
use crawlmesh_common::types::{Collection, Status, UpdateType};
use crawlmesh_common::Config;
use crawlmesh_controller::{InflightSet, ReconcileInput, Reconciler, Scheduler};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    resource: ResourceRef,
    #[serde(rename = "type")]
    update_type: UpdateType,
    status: Status,
    #[serde(default)]
    updates: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ResourceRef {
    url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::controller_from_env();
    config.log_redacted();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    crawlmesh_store::migrate(&pool).await?;
    let store = crawlmesh_store::Store::new(pool);

    let broker = Broker::connect(
        &config.broker.uri,
        Duration::from_secs(config.broker.connection_timeout_secs),
    )
    .await?;

    let inflight = Arc::new(InflightSet::new());

    info!("controller starting: scheduler sweeps plus reconciler update workers");

    Arc::new(Scheduler::new(store.clone(), broker.clone(), inflight.clone())).spawn(
        Duration::from_secs(config.controller.crawl_feeds_rate_secs),
        Duration::from_secs(config.controller.crawl_articles_rate_secs),
        Duration::from_secs(config.controller.scrape_articles_rate_secs),
    );

    let reconciler = Arc::new(Reconciler::new(store, broker.clone(), inflight));

    spawn_update_worker(reconciler.clone(), &broker, Exchange::Feeds, "update_feed", Collection::Feeds);
    spawn_update_worker(reconciler.clone(), &broker, Exchange::Articles, "update_article", Collection::Articles);
    spawn_update_worker(reconciler, &broker, Exchange::Images, "update_image", Collection::Images);

    std::future::pending::<()>().await;
    Ok(())
}

fn spawn_update_worker(
    reconciler: Arc<Reconciler>,
    broker: &Broker,
    exchange: Exchange,
    routing_key: &'static str,
    collection: Collection,
) {
    let worker = broker.worker(exchange, routing_key).with_prefetch(8);
    tokio::spawn(async move {
        let result = worker
            .run(move |delivery| {
                let reconciler = reconciler.clone();
                async move {
                    let msg: UpdateMessage = match delivery.payload_as() {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = %e, "malformed update message payload");
                            return HandlerOutcome::RejectDrop;
                        }
                    };

                    let input = ReconcileInput {
                        collection,
                        url: msg.resource.url,
                        update_type: msg.update_type,
                        status: msg.status,
                        updates: msg.updates,
                    };

                    match reconciler.reconcile(input).await {
                        Ok(()) => HandlerOutcome::Ack,
                        Err(e) if e.is_transient() => {
                            warn!(error = %e, "reconcile failed transiently, requeueing");
                            HandlerOutcome::NackRequeue
                        }
                        Err(e) => {
                            warn!(error = %e, "reconcile failed, dropping");
                            HandlerOutcome::Ack
                        }
                    }
                }
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, routing_key, "update worker exited");
        }
    });
}
