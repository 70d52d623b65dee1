//! `ResourceCrawler<K>` — the generic orchestration shell: fetch, hand fresh
//! contents to the subtype's domain parse, and always report a status back
//! to the controller (spec §4.3).

use chrono::Utc;
use crawlmesh_broker::{Broker, HandlerOutcome};
use crawlmesh_common::types::{CacheControl, ResourceMeta, Status};
use crawlmesh_common::CrawlMeshError;
use crawlmesh_fetch::fetch as fetch_resource;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::kind::CrawlKind;

pub struct ResourceCrawler<K: CrawlKind> {
    kind: K,
    broker: Broker,
    http: reqwest::Client,
    retrieve_timeout: Duration,
    query_exclude: Vec<String>,
}

impl<K: CrawlKind + 'static> ResourceCrawler<K> {
    pub fn new(kind: K, broker: Broker, retrieve_timeout: Duration, query_exclude: Vec<String>) -> Self {
        Self {
            kind,
            broker,
            http: reqwest::Client::new(),
            retrieve_timeout,
            query_exclude,
        }
    }

    /// Bind a durable, prefetch=1 worker to `crawl_<resourceType>` on the
    /// subtype's source exchange and run it until the process exits.
    pub async fn run(self: Arc<Self>) -> Result<(), CrawlMeshError> {
        let routing_key = format!("crawl_{}", self.kind.resource_type());
        let exchange = self.kind.source_exchange();
        let worker = self.broker.worker(exchange, routing_key).with_prefetch(1);
        let this = self;

        worker
            .run(move |delivery| {
                let this = this.clone();
                async move {
                    let resource: ResourceMeta = match delivery.payload_as() {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "malformed crawl job payload");
                            return HandlerOutcome::RejectDrop;
                        }
                    };
                    match this.crawl_resource(resource).await {
                        Ok(()) => HandlerOutcome::Ack,
                        Err(e) if e.is_transient() => {
                            warn!(error = %e, "transient crawl failure, requeueing");
                            HandlerOutcome::NackRequeue
                        }
                        Err(e) => {
                            warn!(error = %e, "crawl failed, dropping job (status already published)");
                            HandlerOutcome::Ack
                        }
                    }
                }
            })
            .await
            .map_err(|e| CrawlMeshError::Broker(e.to_string()))
    }

    /// `CrawlResource(msg)` from spec §4.3.
    pub async fn crawl_resource(&self, resource: ResourceMeta) -> Result<(), CrawlMeshError> {
        let mut updates = Map::new();

        // Guarded block 1: fetch.
        let (status1, outcome) = guarded(fetch_resource(
            &self.http,
            &resource,
            true,
            self.retrieve_timeout,
            self.kind.content_kind(),
            &self.query_exclude,
        ))
        .await;

        if let Some(outcome) = &outcome {
            if let Some(canonical) = &outcome.resource.canonical_url {
                updates.insert("canonical_url".to_string(), json!(canonical));
            }
            if outcome.resource.cache_control != CacheControl::default() {
                updates.insert("cache_control".to_string(), json!(outcome.resource.cache_control));
            }
        }

        let mut final_status = status1;

        // Guarded block 2: subtype parse, only when fresh contents arrived.
        if let Some(outcome) = outcome {
            if let Some(contents) = outcome.contents {
                let (status2, parsed) = guarded(self.kind.crawl(
                    &self.broker,
                    &outcome.resource,
                    &contents,
                    &outcome.headers,
                ))
                .await;

                if let Some(parsed_updates) = parsed {
                    updates.extend(parsed_updates);
                }
                final_status = status2;
            }
        }

        info!(
            url = %resource.url,
            resource_type = self.kind.resource_type(),
            ok = final_status.is_ok(),
            "crawl complete"
        );

        let publisher = self.broker.publisher(self.kind.source_exchange());
        publisher
            .publish(
                &format!("update_{}", self.kind.resource_type()),
                json!({
                    "resource": { "url": resource.url },
                    "type": "crawl",
                    "status": final_status,
                    "updates": Value::Object(updates),
                }),
            )
            .await
            .map_err(|e| CrawlMeshError::Broker(e.to_string()))?;

        Ok(())
    }
}

/// Scoped acquisition of a mutable `Status`, per spec §4.3: on any error the
/// block captures `error_type`/`error`, sets `ok=false`, and never rethrows
/// to the outer flow — the outer flow always publishes an update.
async fn guarded<T, E, Fut>(fut: Fut) -> (Status, Option<T>)
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<CrawlMeshError>,
{
    let when = Utc::now();
    match fut.await {
        Ok(value) => (Status::ok(when), Some(value)),
        Err(e) => {
            let e: CrawlMeshError = e.into();
            (Status::err(when, error_type_name(&e), e.to_string()), None)
        }
    }
}

fn error_type_name(e: &CrawlMeshError) -> &'static str {
    match e {
        CrawlMeshError::Timeout(_) => "Timeout",
        CrawlMeshError::HttpStatus { .. } => "HTTPStatusError",
        CrawlMeshError::DataUrl(_) => "DataUrlError",
        CrawlMeshError::Protocol(_) => "ProtocolError",
        CrawlMeshError::Broker(_) => "BrokerError",
        CrawlMeshError::Store(_) => "StoreError",
        CrawlMeshError::Policy(_) => "PolicyError",
        CrawlMeshError::Invariant(_) => "InvariantError",
        CrawlMeshError::Config(_) => "ConfigError",
        CrawlMeshError::Anyhow(_) => "Error",
    }
}
