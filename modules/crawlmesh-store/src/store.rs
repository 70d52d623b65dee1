//! `Store` — url-keyed JSONB document store backed by Postgres.
//!
//! Generalizes the append-only fact-store shape (typed methods wrapping
//! hand-written SQL, a `Clone`-able handle wrapping a `PgPool`) to an
//! upsert/find-one-and-update collection API: callers treat each named
//! collection as an interchangeable url-keyed document bag, exactly as
//! specified for feeds/articles/images.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;
use std::marker::PhantomData;
use tracing::warn;

/// Handle to the document store. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bind a typed view onto one named collection (`"feeds"`, `"articles"`,
    /// `"images"`, ...). Collections are created lazily by the first write;
    /// there is no per-collection schema.
    pub fn collection<T>(&self, name: impl Into<String>) -> Collection<T> {
        Collection {
            pool: self.pool.clone(),
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

/// A typed, url-keyed view onto one collection of JSONB documents.
pub struct Collection<T> {
    pool: PgPool,
    name: String,
    _marker: PhantomData<T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert the document under `url`, or replace it wholesale if one
    /// already exists. Used for `save_article` and for the redirect
    /// reconciliation's canonical-URL upsert.
    pub async fn upsert(&self, url: &str, doc: &T) -> Result<()> {
        let value = serde_json::to_value(doc)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, url, doc, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (collection, url)
            DO UPDATE SET doc = EXCLUDED.doc, updated_at = now()
            "#,
        )
        .bind(&self.name)
        .bind(url)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch the document at `url`, or `None` if no document exists there.
    pub async fn find_one(&self, url: &str) -> Result<Option<T>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM documents WHERE collection = $1 AND url = $2")
                .bind(&self.name)
                .bind(url)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Atomically load, transform, and persist the document at `url`.
    /// `returnAfter=true` semantics: returns the document *after* applying
    /// `update`, or `None` if no document exists at that url — this method
    /// never creates one. Callers that need upsert semantics use
    /// [`Collection::upsert`] instead.
    pub async fn find_one_and_update<F>(&self, url: &str, update: F) -> Result<Option<T>>
    where
        F: FnOnce(T) -> T + Send,
    {
        let mut tx = self.pool.begin().await?;

        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT doc FROM documents WHERE collection = $1 AND url = $2 FOR UPDATE",
        )
        .bind(&self.name)
        .bind(url)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((value,)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let current: T = serde_json::from_value(value)?;
        let updated = update(current);
        let new_value = serde_json::to_value(&updated)?;

        sqlx::query(
            "UPDATE documents SET doc = $1, updated_at = now() WHERE collection = $2 AND url = $3",
        )
        .bind(&new_value)
        .bind(&self.name)
        .bind(url)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(updated))
    }

    /// Delete the document at `url`, if any. Used when an article is
    /// re-keyed under its canonical URL during redirect reconciliation.
    pub async fn delete(&self, url: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE collection = $1 AND url = $2")
            .bind(&self.name)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Scan every document in the collection matching `predicate`, sorted by
    /// `order_by` if given. Used by the controller scheduler's periodic
    /// sweeps, which have no natural index to seek on besides a handful of
    /// status timestamp columns — a full collection scan filtered in Rust
    /// keeps the store's API storage-agnostic while the scheduler stays
    /// small and correct. A real deployment at scale would replace this with
    /// a partial index per sweep predicate.
    pub async fn scan<F>(&self, mut predicate: F) -> Result<Vec<T>>
    where
        F: FnMut(&T) -> bool,
    {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT doc FROM documents WHERE collection = $1")
                .bind(&self.name)
                .fetch_all(&self.pool)
                .await?;

        let mut out = Vec::new();
        for (value,) in rows {
            match serde_json::from_value::<T>(value) {
                Ok(doc) => {
                    if predicate(&doc) {
                        out.push(doc);
                    }
                }
                Err(e) => warn!(collection = %self.name, error = %e, "skipping undeserializable document"),
            }
        }
        Ok(out)
    }
}

#[cfg(feature = "test-utils")]
impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub async fn count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = $1")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
