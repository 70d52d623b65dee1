//! Types the document store hands back to callers. Domain-agnostic: the
//! store has no notion of feeds, articles, or images, only url-keyed JSONB
//! documents grouped into named collections.

/// A document as stored in Postgres: the collection it belongs to, its
/// url key, and the JSON body. `find_one`/`find_one_and_update` deserialize
/// `doc` into the caller's type; `upsert` serializes into it.
#[derive(Debug, Clone)]
pub struct StoredDoc {
    pub collection: String,
    pub url: String,
    pub doc: serde_json::Value,
}
