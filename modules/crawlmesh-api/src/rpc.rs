//! The `controller_rpc` method registry (spec §4.7): `feeds_list`,
//! `feeds_load`, `recsystem_register`, `recsystem_refresh_token`,
//! `status`, plus `ping` for the websocket handshake. Shared verbatim
//! between the broker-bound [`crawlmesh_broker::RpcEndpoint`] and the
//! inbound half of each websocket's JSON-RPC mux, so there is exactly one
//! implementation of each method.

use crawlmesh_common::types::{Collection, Feed, FeedType, Recsystem, ResourceMeta};
use crawlmesh_store::Store;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::token::{TokenError, TokenIssuer};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(String),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub struct RpcServer {
    store: Store,
    issuer: Arc<dyn TokenIssuer>,
}

impl RpcServer {
    pub fn new(store: Store, issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { store, issuer }
    }

    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "ping" => Ok(json!("pong")),
            "feeds_list" => self.feeds_list(params).await,
            "feeds_load" => self.feeds_load(params).await,
            "recsystem_register" => self.recsystem_register(params).await,
            "recsystem_refresh_token" => self.recsystem_refresh_token(params).await,
            "status" => self.status().await,
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }

    async fn feeds_list(&self, params: Value) -> Result<Value, RpcError> {
        let format = params.get("format").and_then(Value::as_str).unwrap_or("url");
        let header = params.get("header").and_then(Value::as_bool).unwrap_or(false);

        let feeds = self
            .store
            .collection::<Value>(Collection::Feeds.as_str())
            .scan(|_| true)
            .await
            .map_err(|e| RpcError::Store(e.to_string()))?;

        let mut rows = Vec::new();
        if header {
            rows.push(if format == "full" { json!("url,lang,type") } else { json!("url") });
        }
        for doc in &feeds {
            if format == "full" {
                rows.push(doc.clone());
            } else if let Some(url) = doc.get("url").and_then(Value::as_str) {
                rows.push(json!(url));
            }
        }

        Ok(json!({ "feeds": rows }))
    }

    async fn feeds_load(&self, params: Value) -> Result<Value, RpcError> {
        let entries = params
            .get("feeds")
            .and_then(Value::as_array)
            .ok_or_else(|| RpcError::InvalidParams("feeds[] is required".to_string()))?;

        let coll = self.store.collection::<Value>(Collection::Feeds.as_str());
        let mut loaded = 0usize;
        for entry in entries {
            let url = entry
                .as_str()
                .ok_or_else(|| RpcError::InvalidParams("feed entries must be urls".to_string()))?;

            let exists = coll
                .find_one(url)
                .await
                .map_err(|e| RpcError::Store(e.to_string()))?
                .is_some();
            if exists {
                continue;
            }

            let feed = Feed { meta: ResourceMeta::new(url), feed_type: FeedType::Rss };
            coll.upsert(url, &serde_json::to_value(&feed)?)
                .await
                .map_err(|e| RpcError::Store(e.to_string()))?;
            loaded += 1;
        }

        Ok(json!({ "loaded": loaded, "skipped": entries.len() - loaded }))
    }

    async fn recsystem_register(&self, params: Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::InvalidParams("name is required".to_string()))?
            .to_string();
        let is_baseline = params.get("is_baseline").and_then(Value::as_bool).unwrap_or(false);
        let owners = params
            .get("owners")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_else(Vec::new);

        let token_id = random_token_id();
        let recsystem_id = format!("rs-{}", Uuid::new_v4());
        let recsystem = Recsystem { name, is_baseline, owners, token_id: token_id.clone() };

        let mut doc = serde_json::to_value(&recsystem)?;
        if let Value::Object(map) = &mut doc {
            map.insert("id".to_string(), json!(recsystem_id));
        }

        let coll = self.store.collection::<Value>(Collection::Recsystems.as_str());
        coll.upsert(&recsystem_id, &doc)
            .await
            .map_err(|e| RpcError::Store(e.to_string()))?;

        match self.issuer.issue(&recsystem_id, &token_id) {
            Ok(token) => Ok(json!({ "recsystem_id": recsystem_id, "token": token })),
            Err(e) => {
                // Signing failed after the insert committed: roll it back so a
                // half-registered recsystem with no usable token can't linger.
                let _ = coll.delete(&recsystem_id).await;
                Err(e.into())
            }
        }
    }

    async fn recsystem_refresh_token(&self, params: Value) -> Result<Value, RpcError> {
        let id_or_name = params
            .get("id_or_name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::InvalidParams("id_or_name is required".to_string()))?;

        let coll = self.store.collection::<Value>(Collection::Recsystems.as_str());
        let recsystem_id = self.resolve_recsystem_id(&coll, id_or_name).await?;

        let new_token_id = random_token_id();
        coll.find_one_and_update(&recsystem_id, {
            let new_token_id = new_token_id.clone();
            move |mut doc| {
                if let Value::Object(map) = &mut doc {
                    map.insert("token_id".to_string(), json!(new_token_id));
                }
                doc
            }
        })
        .await
        .map_err(|e| RpcError::Store(e.to_string()))?
        .ok_or_else(|| RpcError::NotFound(id_or_name.to_string()))?;

        let token = self.issuer.issue(&recsystem_id, &new_token_id)?;
        Ok(json!({ "recsystem_id": recsystem_id, "token": token }))
    }

    async fn resolve_recsystem_id(
        &self,
        coll: &crawlmesh_store::Collection<Value>,
        id_or_name: &str,
    ) -> Result<String, RpcError> {
        if coll
            .find_one(id_or_name)
            .await
            .map_err(|e| RpcError::Store(e.to_string()))?
            .is_some()
        {
            return Ok(id_or_name.to_string());
        }

        // The store is id-keyed; a refresh-by-name call falls back to a
        // linear scan matching the `name` field embedded in the document.
        // `recsystem_register` hands back the id for routine use.
        let all = coll.scan(|_| true).await.map_err(|e| RpcError::Store(e.to_string()))?;
        all.into_iter()
            .find(|doc| doc.get("name").and_then(Value::as_str) == Some(id_or_name))
            .and_then(|doc| doc.get("id").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| RpcError::NotFound(id_or_name.to_string()))
    }

    async fn status(&self) -> Result<Value, RpcError> {
        let feeds = self
            .store
            .collection::<Value>(Collection::Feeds.as_str())
            .scan(|_| true)
            .await
            .map_err(|e| RpcError::Store(e.to_string()))?
            .len();
        let articles = self
            .store
            .collection::<Value>(Collection::Articles.as_str())
            .scan(|_| true)
            .await
            .map_err(|e| RpcError::Store(e.to_string()))?
            .len();
        let images = self
            .store
            .collection::<Value>(Collection::Images.as_str())
            .scan(|_| true)
            .await
            .map_err(|e| RpcError::Store(e.to_string()))?
            .len();

        Ok(json!({ "feeds": feeds, "articles": articles, "images": images }))
    }
}

fn random_token_id() -> String {
    let a = Uuid::new_v4().simple().to_string();
    let b = Uuid::new_v4().simple().to_string();
    format!("{}{}", a, &b[..8])
}
