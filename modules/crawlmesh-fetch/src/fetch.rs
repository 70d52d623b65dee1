//! `fetch()` — conditional HTTP GET with ETag/Last-Modified/SHA1 fallback,
//! inline `data:` URL handling, and canonical-URL derivation.

use chrono::{DateTime, Utc};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::time::Duration;

use crawlmesh_common::types::{CacheControl, ResourceMeta};

use crate::canonical::canonicalize;
use crate::data_url::decode_data_url;
use crate::error::FetchError;

/// Whether the resource is parsed as text (feeds, articles) or treated as
/// an opaque byte blob (images).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Binary,
}

#[derive(Debug, Clone)]
pub enum Contents {
    Text(String),
    Binary(Vec<u8>),
}

impl Contents {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Contents::Text(s) => s.as_bytes(),
            Contents::Binary(b) => b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// The resource with `canonical_url`/`cache_control` advanced.
    pub resource: ResourceMeta,
    /// `None` when the server returned 304, or the SHA1 fallback detected no
    /// change — the caller keeps the previous contents.
    pub contents: Option<Contents>,
    pub headers: HashMap<String, String>,
}

/// Implements the seven-step conditional-GET protocol.
pub async fn fetch(
    client: &reqwest::Client,
    resource: &ResourceMeta,
    only_if_modified: bool,
    timeout: Duration,
    content_kind: ContentKind,
    query_exclude: &[String],
) -> Result<FetchOutcome, FetchError> {
    // Step 1: data: URLs are decoded inline, no network round trip.
    if resource.url.starts_with("data:") {
        let (bytes, content_type) = decode_data_url(&resource.url)?;
        let sha1 = hex::encode(Sha1::digest(&bytes));

        let mut updated = resource.clone();
        updated.cache_control.sha1 = Some(sha1);

        let contents = match content_kind {
            ContentKind::Text => Contents::Text(
                String::from_utf8(bytes).map_err(|e| FetchError::Encoding(e.to_string()))?,
            ),
            ContentKind::Binary => Contents::Binary(bytes),
        };

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), content_type);

        return Ok(FetchOutcome { resource: updated, contents: Some(contents), headers });
    }

    // Step 2: conditional headers.
    let mut request = client.get(&resource.url).timeout(timeout);
    if only_if_modified {
        if let Some(etag) = &resource.cache_control.etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = &resource.cache_control.last_modified {
            request = request.header("If-Modified-Since", http_date(*last_modified));
        }
    }

    // Step 3: perform the GET.
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e.to_string())
        }
    })?;

    if response.status().as_u16() == 304 {
        let headers = header_map(&response);
        return Ok(FetchOutcome { resource: resource.clone(), contents: None, headers });
    }

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus {
            status: response.status().as_u16(),
            url: resource.url.clone(),
        });
    }

    // Step 4: record new cache validators.
    let mut updated = resource.clone();
    let headers = header_map(&response);
    updated.cache_control.etag = headers.get("etag").cloned();
    updated.cache_control.last_modified = headers
        .get("last-modified")
        .and_then(|v| parse_http_date(v));

    let final_url = response.url().to_string();

    // Step 5: read body, compute SHA1.
    let bytes = response
        .bytes()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?
        .to_vec();
    let sha1 = hex::encode(Sha1::digest(&bytes));

    // Step 6: SHA1 fallback for servers that don't honor conditional GET.
    if only_if_modified && Some(&sha1) == resource.cache_control.sha1.as_ref() {
        return Ok(FetchOutcome { resource: updated, contents: None, headers });
    }

    // Step 7: canonical URL derivation.
    // `is_redirect` is not set here: it's a reconciler-owned field, derived
    // from comparing `canonical_url` against the document's own `url` once
    // the update is applied to storage (§update_resource step 2).
    updated.canonical_url = Some(canonicalize(&final_url, query_exclude));
    updated.cache_control.sha1 = Some(sha1);

    let contents = match content_kind {
        ContentKind::Text => Contents::Text(
            String::from_utf8(bytes).map_err(|e| FetchError::Encoding(e.to_string()))?,
        ),
        ContentKind::Binary => Contents::Binary(bytes),
    };

    Ok(FetchOutcome { resource: updated, contents: Some(contents), headers })
}

fn header_map(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect()
}

fn http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Not derived from `CacheControl` directly: kept here so
/// `crawlmesh-fetch` owns the one place cache_control gets constructed
/// from raw header text, independent of how the store round-trips it.
pub fn initial_cache_control() -> CacheControl {
    CacheControl::default()
}
