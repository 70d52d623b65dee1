//! Generic, domain-agnostic document store.
//!
//! Stores url-keyed JSONB documents grouped into named collections, plus a
//! small family of monotonic counters. Consumers provide their own document
//! types that serialize to/from `serde_json::Value`; the store itself knows
//! nothing about feeds, articles, or images.

pub mod sequence;
pub mod store;
#[cfg(feature = "test-utils")]
pub mod testutil;
pub mod types;

pub use sequence::SequenceStore;
pub use store::{Collection, Store};
pub use types::StoredDoc;

use sqlx::PgPool;

/// Create the `documents` and `sequences` tables if they don't already
/// exist. Idempotent; safe to run on every binary startup.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            url TEXT NOT NULL,
            doc JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (collection, url)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sequences (
            id TEXT PRIMARY KEY,
            seq BIGINT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
