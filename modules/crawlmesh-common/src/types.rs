//! Data model shared by every crate in the pipeline: resources (feeds,
//! articles, images), sites, recsystems, interactions, and the small status
//! types stamped on every crawl/scrape attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ETag/Last-Modified/SHA1 bookkeeping used to make conditional GETs cheap.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheControl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
}

/// Stamped on every crawl/scrape attempt. `ok=false` carries the error
/// classification; `ok=true` never does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "ok")]
pub enum Status {
    #[serde(rename = "true")]
    Ok { when: DateTime<Utc> },
    #[serde(rename = "false")]
    Err {
        when: DateTime<Utc>,
        error_type: String,
        error: String,
    },
}

impl Status {
    pub fn ok(when: DateTime<Utc>) -> Self {
        Status::Ok { when }
    }

    pub fn err(when: DateTime<Utc>, error_type: impl Into<String>, error: impl Into<String>) -> Self {
        Status::Err {
            when,
            error_type: error_type.into(),
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok { .. })
    }

    pub fn when(&self) -> DateTime<Utc> {
        match self {
            Status::Ok { when } => *when,
            Status::Err { when, .. } => *when,
        }
    }
}

/// Running counters and last-success/last-error timestamps for one operation
/// (crawl or scrape) on one resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub error_count: i64,
}

impl Stats {
    /// Apply a `Status`, mirroring step 4 of `update_resource`: stamp
    /// `last_success` or `last_error` and increment the matching counter.
    pub fn record(&mut self, status: &Status) {
        if status.is_ok() {
            self.last_success = Some(status.when());
            self.success_count += 1;
        } else {
            self.last_error = Some(status.when());
            self.error_count += 1;
        }
    }
}

/// Fields common to every resource kind (feed, article, image).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMeta {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(default)]
    pub is_redirect: bool,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub cache_control: CacheControl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crawl_status: Option<Status>,
    #[serde(default)]
    pub crawl_stats: Stats,
    /// Raw attempt counters, independent of outcome. Supplements
    /// `crawl_stats.{success,error}_count` with the original implementation's
    /// per-kind access/crawl tallies.
    #[serde(default)]
    pub times_accessed: i64,
    #[serde(default)]
    pub times_crawled: i64,
}

fn default_lang() -> String {
    "en".to_string()
}

impl ResourceMeta {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            canonical_url: None,
            is_redirect: false,
            lang: default_lang(),
            cache_control: CacheControl::default(),
            crawl_status: None,
            crawl_stats: Stats::default(),
            times_accessed: 0,
            times_crawled: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Rss,
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedType::Rss => write!(f, "rss"),
        }
    }
}

impl FromStr for FeedType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rss" => Ok(FeedType::Rss),
            other => Err(format!("unknown feed type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feed {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(rename = "type")]
    pub feed_type: FeedType,
}

/// Like/dislike/bookmark/click counters recorded against an article.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ArticleMetrics {
    pub likes: i64,
    pub dislikes: i64,
    pub bookmarks: i64,
    pub clicks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    /// Monotonic, assigned at first successful scrape. Never changes once set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_id: Option<i64>,
    pub times_seen: i64,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_status: Option<Status>,
    #[serde(default)]
    pub scrape_stats: Stats,
    /// Raw HTML, present after first crawl.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    /// Reference to the owning `Site` document's id, assigned by the
    /// `pre_scrape_articles` hook.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub metrics: ArticleMetrics,
}

impl Article {
    /// A freshly-discovered article, as created by `save_article`.
    pub fn discovered(url: impl Into<String>, lang: Option<String>, now: DateTime<Utc>) -> Self {
        let mut meta = ResourceMeta::new(url);
        if let Some(lang) = lang {
            meta.lang = lang;
        }
        Self {
            meta,
            article_id: None,
            times_seen: 1,
            last_seen: now,
            scrape_status: None,
            scrape_stats: Stats::default(),
            contents: None,
            site: None,
            title: None,
            authors: Vec::new(),
            summary: None,
            text: None,
            publish_date: None,
            image_url: None,
            keywords: Vec::new(),
            metrics: ArticleMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(with = "base64_bytes")]
    pub contents: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Image {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            meta: ResourceMeta::new(url),
            contents: None,
            content_type: None,
        }
    }
}

/// Serialize image bytes as base64 so `Image` round-trips through the JSONB
/// document store and broker message bodies without a binary column.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => STANDARD.encode(bytes).serialize(s),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt: Option<String> = Option::deserialize(d)?;
        match opt {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Site {
    pub url: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

impl Site {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            icon_resource_id: None,
            icon_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recsystem {
    pub name: String,
    pub is_baseline: bool,
    #[serde(default)]
    pub owners: Vec<String>,
    /// 40-hex rotating nonce; rotated wholesale by `recsystem_refresh_token`.
    pub token_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Down,
    Neutral,
    Up,
}

impl Rating {
    pub fn as_i8(self) -> i8 {
        match self {
            Rating::Down => -1,
            Rating::Neutral => 0,
            Rating::Up => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleInteraction {
    pub user_id: String,
    pub article_id: i64,
    pub rating: i8,
    pub bookmarked: bool,
    pub clicked: bool,
}

/// A named monotonic counter, e.g. `{_id: "article_id", seq: 41}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sequence {
    pub id: String,
    pub seq: i64,
}

/// The two resource operation kinds `update_resource` reconciles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Crawl,
    Scrape,
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateType::Crawl => write!(f, "crawl"),
            UpdateType::Scrape => write!(f, "scrape"),
        }
    }
}

/// Resource collections, named exactly as they appear on the wire
/// (`feeds`, `articles`, `images`), plus the two supporting collections the
/// reconciler upserts into (`sites`, `recsystems`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Feeds,
    Articles,
    Images,
    Sites,
    Recsystems,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Feeds => "feeds",
            Collection::Articles => "articles",
            Collection::Images => "images",
            Collection::Sites => "sites",
            Collection::Recsystems => "recsystems",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_record_success() {
        let mut stats = Stats::default();
        let when = Utc::now();
        stats.record(&Status::ok(when));
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.error_count, 0);
        assert_eq!(stats.last_success, Some(when));
    }

    #[test]
    fn stats_record_error() {
        let mut stats = Stats::default();
        let when = Utc::now();
        stats.record(&Status::err(when, "Timeout", "deadline exceeded"));
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.last_error, Some(when));
    }

    #[test]
    fn feed_type_roundtrip() {
        assert_eq!("rss".parse::<FeedType>().unwrap(), FeedType::Rss);
        assert_eq!(FeedType::Rss.to_string(), "rss");
    }

    #[test]
    fn discovered_article_has_no_article_id() {
        let a = Article::discovered("https://example.org/a1", None, Utc::now());
        assert!(a.article_id.is_none());
        assert_eq!(a.times_seen, 1);
        assert_eq!(a.meta.lang, "en");
    }
}
