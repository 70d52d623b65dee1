//! `update_resource` — the reconciler that folds a crawl/scrape outcome
//! back into the document store (spec §4.5).

use crawlmesh_broker::Broker;
use crawlmesh_common::types::{Collection, Status, UpdateType};
use crawlmesh_common::CrawlMeshError;
use crawlmesh_store::Store;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

use crate::hooks::{run_post_hook, run_pre_hook};
use crate::inflight::{InflightKey, InflightSet};

#[derive(Debug, Clone)]
pub struct ReconcileInput {
    pub collection: Collection,
    pub url: String,
    pub update_type: UpdateType,
    pub status: Status,
    pub updates: Map<String, Value>,
}

pub struct Reconciler {
    store: Store,
    broker: Broker,
    inflight: Arc<InflightSet>,
}

impl Reconciler {
    pub fn new(store: Store, broker: Broker, inflight: Arc<InflightSet>) -> Self {
        Self { store, broker, inflight }
    }

    pub async fn reconcile(&self, input: ReconcileInput) -> Result<(), CrawlMeshError> {
        self.reconcile_inner(input, false).await
    }

    /// Boxed by hand: `update_resource` recurses once for redirects (step
    /// 8), which an `async fn` can't do without an explicit future type.
    fn reconcile_inner<'a>(
        &'a self,
        input: ReconcileInput,
        is_redirect_recursion: bool,
    ) -> Pin<Box<dyn Future<Output = Result<(), CrawlMeshError>> + Send + 'a>> {
        Box::pin(async move {
        let ReconcileInput { collection, url, update_type, status, updates } = input;
        let status_field = format!("{update_type}_status");
        let stats_field = format!("{update_type}_stats");
        let coll = self.store.collection::<Value>(collection.as_str());

        // Step 2: redirect detection, ahead of the pre-hook per spec — a
        // redirect update never runs the collection's pre-hook for the
        // original url, only (recursively) for the canonical one.
        let canonical = updates
            .get("canonical_url")
            .and_then(Value::as_str)
            .filter(|c| *c != url)
            .map(str::to_string);

        let mut update_set = updates.clone();

        if canonical.is_none() {
            // Step 3: pre-hook, only for non-redirect updates with content
            // and only when the reported status is ok (spec §4.5).
            if !updates.is_empty() && status.is_ok() {
                let current = coll
                    .find_one(&url)
                    .await
                    .map_err(|e| CrawlMeshError::Store(e.to_string()))?;
                let extra = run_pre_hook(
                    &self.store,
                    &self.broker,
                    update_type,
                    collection,
                    current.as_ref(),
                    &status,
                    &updates,
                )
                .await?;
                update_set.extend(extra);
            }
        } else {
            update_set.insert("canonical_url".to_string(), Value::String(canonical.clone().unwrap()));
            update_set.insert("is_redirect".to_string(), Value::Bool(true));
        }

        let set_for_closure = update_set.clone();
        let status_for_closure = status.clone();
        let status_field_closure = status_field.clone();
        let stats_field_closure = stats_field.clone();

        // Steps 1 + 4 + 5: apply the merged set plus status/stats stamping,
        // atomically, inside the store's find-one-and-update transaction.
        let doc = coll
            .find_one_and_update(&url, move |mut current| {
                apply_set(&mut current, &set_for_closure);
                stamp_status(&mut current, &status_field_closure, &status_for_closure);
                stamp_stats(&mut current, &stats_field_closure, &status_for_closure);
                current
            })
            .await
            .map_err(|e| CrawlMeshError::Store(e.to_string()))?;

        let key = InflightKey { update_type, collection };

        // Step 6.
        let Some(doc) = doc else {
            warn!(%url, %collection, "update_resource: url not present in collection");
            return Ok(());
        };

        // Step 7.
        self.inflight.remove(key, &url);

        if let Some(canon) = canonical {
            // Step 8: reconcile the canonical url too (which creates/upserts
            // it), then fork the original document across under the
            // canonical key.
            if !is_redirect_recursion {
                self.reconcile_inner(
                    ReconcileInput {
                        collection,
                        url: canon.clone(),
                        update_type,
                        status: status.clone(),
                        updates: updates.clone(),
                    },
                    true,
                )
                .await?;
            }

            let mut forked = doc.clone();
            if let Value::Object(map) = &mut forked {
                map.insert("url".to_string(), Value::String(canon.clone()));
                map.insert("is_redirect".to_string(), Value::Bool(false));
                apply_set(&mut forked, &updates);
            }
            coll.upsert(&canon, &forked)
                .await
                .map_err(|e| CrawlMeshError::Store(e.to_string()))?;
            self.inflight.remove(key, &canon);
        } else {
            // Step 9.
            run_post_hook(&self.store, &self.broker, update_type, collection, &doc, &status).await?;
        }

        Ok(())
        })
    }
}

fn apply_set(doc: &mut Value, set: &Map<String, Value>) {
    let Value::Object(map) = doc else { return };
    for (k, v) in set {
        map.insert(k.clone(), v.clone());
    }
}

fn stamp_status(doc: &mut Value, field: &str, status: &Status) {
    let Value::Object(map) = doc else { return };
    map.insert(field.to_string(), serde_json::to_value(status).unwrap());
}

fn stamp_stats(doc: &mut Value, field: &str, status: &Status) {
    let Value::Object(map) = doc else { return };
    let mut stats: crawlmesh_common::types::Stats = map
        .get(field)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();
    stats.record(status);
    map.insert(field.to_string(), serde_json::to_value(stats).unwrap());
}
