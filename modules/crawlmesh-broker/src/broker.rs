//! `Broker` — named-exchange publish/worker/RPC primitives backed by
//! Postgres.
//!
//! Exchanges are rows tagged `(exchange, routing_key)` in a single durable
//! `queue_messages` table; workers dequeue with `SELECT ... FOR UPDATE SKIP
//! LOCKED`, the standard idiomatic job-queue pattern on top of sqlx, instead
//! of a dedicated AMQP client the rest of the stack has no other use for.

use serde_json::Value;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::BrokerError;
use crate::types::{Delivery, Exchange, HandlerOutcome};

const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_millis(200);

/// Create the `queue_messages` table if it doesn't already exist. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), BrokerError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            id BIGSERIAL PRIMARY KEY,
            exchange TEXT NOT NULL,
            routing_key TEXT NOT NULL,
            payload JSONB NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            correlation_id TEXT,
            reply_to TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS queue_messages_dequeue_idx \
         ON queue_messages (exchange, routing_key, status, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Handle to the broker. Cheap to clone; wraps a connection pool.
#[derive(Clone)]
pub struct Broker {
    pool: PgPool,
}

impl Broker {
    /// Connect with retry-until-deadline on connection refused, per the
    /// `broker.connection_timeout` config option.
    pub async fn connect(database_url: &str, connection_timeout: Duration) -> Result<Self, BrokerError> {
        let deadline = tokio::time::Instant::now() + connection_timeout;
        loop {
            match sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
            {
                Ok(pool) => {
                    migrate(&pool).await?;
                    return Ok(Self { pool });
                }
                Err(e) if tokio::time::Instant::now() < deadline => {
                    warn!(error = %e, "broker connect failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Err(e) => return Err(BrokerError::Connect(e.to_string())),
            }
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn publisher(&self, exchange: Exchange) -> Publisher {
        Publisher {
            exchange,
            broker: self.clone(),
        }
    }

    pub fn worker(&self, exchange: Exchange, routing_key: impl Into<String>) -> Worker {
        Worker {
            exchange,
            routing_key: routing_key.into(),
            prefetch: 1,
            broker: self.clone(),
        }
    }

    async fn insert(
        &self,
        exchange: Exchange,
        routing_key: &str,
        payload: &Value,
        correlation_id: Option<&str>,
        reply_to: Option<&str>,
    ) -> Result<i64, BrokerError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO queue_messages (exchange, routing_key, payload, correlation_id, reply_to)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(exchange.as_str())
        .bind(routing_key)
        .bind(payload)
        .bind(correlation_id)
        .bind(reply_to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn dequeue_one(
        &self,
        exchange: Exchange,
        routing_key: &str,
    ) -> Result<Option<Delivery>, BrokerError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, Value, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, payload, correlation_id, reply_to
            FROM queue_messages
            WHERE exchange = $1 AND routing_key = $2 AND status = 'pending'
            ORDER BY id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(exchange.as_str())
        .bind(routing_key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, payload, correlation_id, reply_to)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE queue_messages SET status = 'processing' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(Delivery {
            id,
            exchange,
            routing_key: routing_key.to_string(),
            payload,
            correlation_id,
            reply_to,
        }))
    }

    /// Dequeue the oldest pending message on `exchange` regardless of
    /// routing key. Used by RPC endpoints, which service every method bound
    /// to one queue rather than one routing key per worker.
    pub(crate) async fn dequeue_any(&self, exchange: Exchange) -> Result<Option<Delivery>, BrokerError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, String, Value, Option<String>, Option<String>)> = sqlx::query_as(
            r#"
            SELECT id, routing_key, payload, correlation_id, reply_to
            FROM queue_messages
            WHERE exchange = $1 AND status = 'pending'
            ORDER BY id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(exchange.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, routing_key, payload, correlation_id, reply_to)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("UPDATE queue_messages SET status = 'processing' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(Delivery {
            id,
            exchange,
            routing_key,
            payload,
            correlation_id,
            reply_to,
        }))
    }

    /// Publish a reply tagged with `reply_to`/`correlation_id` onto the
    /// internal replies channel, polled by [`crate::rpc::RpcClient::call`].
    pub(crate) async fn publish_reply(
        &self,
        reply_to: &str,
        correlation_id: &str,
        payload: &Value,
    ) -> Result<(), BrokerError> {
        sqlx::query(
            r#"
            INSERT INTO queue_messages (exchange, routing_key, payload, correlation_id, reply_to)
            VALUES ('rpc_replies', $1, $2, $3, $1)
            "#,
        )
        .bind(reply_to)
        .bind(payload)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Poll for a reply tagged `(reply_to, correlation_id)`, consuming it.
    pub(crate) async fn take_reply(
        &self,
        reply_to: &str,
        correlation_id: &str,
    ) -> Result<Option<Value>, BrokerError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i64, Value)> = sqlx::query_as(
            r#"
            SELECT id, payload FROM queue_messages
            WHERE exchange = 'rpc_replies' AND routing_key = $1 AND correlation_id = $2
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .bind(reply_to)
        .bind(correlation_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((id, payload)) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query("DELETE FROM queue_messages WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(payload))
    }

    pub(crate) async fn resolve(&self, id: i64, outcome: HandlerOutcome) -> Result<(), BrokerError> {
        match outcome {
            HandlerOutcome::Ack => {
                sqlx::query("DELETE FROM queue_messages WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            HandlerOutcome::NackRequeue => {
                sqlx::query("UPDATE queue_messages SET status = 'pending' WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
            HandlerOutcome::RejectDrop => {
                sqlx::query("UPDATE queue_messages SET status = 'rejected' WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

/// A bound publisher for one exchange.
pub struct Publisher {
    exchange: Exchange,
    broker: Broker,
}

impl Publisher {
    pub async fn publish(&self, routing_key: &str, payload: Value) -> Result<i64, BrokerError> {
        self.broker
            .insert(self.exchange, routing_key, &payload, None, None)
            .await
    }

    pub(crate) async fn publish_with_correlation(
        &self,
        routing_key: &str,
        payload: Value,
        correlation_id: &str,
        reply_to: &str,
    ) -> Result<i64, BrokerError> {
        self.broker
            .insert(
                self.exchange,
                routing_key,
                &payload,
                Some(correlation_id),
                Some(reply_to),
            )
            .await
    }
}

/// A durable-queue consumer bound to `exchange:routing_key`.
pub struct Worker {
    exchange: Exchange,
    routing_key: String,
    prefetch: usize,
    broker: Broker,
}

impl Worker {
    /// Crawler queues default to `prefetch=1` (one in-flight message per
    /// worker, the backpressure the spec requires); reconcilers run
    /// unbounded concurrency by raising this.
    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch.max(1);
        self
    }

    /// Run the consume loop until the process is torn down. `handler` is
    /// invoked once per delivery; its `HandlerOutcome` determines whether the
    /// message is acked, requeued, or dropped.
    pub async fn run<F, Fut>(self, handler: F) -> Result<(), BrokerError>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome> + Send,
    {
        let handler = std::sync::Arc::new(handler);
        let mut slots = Vec::with_capacity(self.prefetch);
        for _ in 0..self.prefetch {
            let broker = self.broker.clone();
            let exchange = self.exchange;
            let routing_key = self.routing_key.clone();
            let handler = handler.clone();
            slots.push(tokio::spawn(async move {
                loop {
                    match broker.dequeue_one(exchange, &routing_key).await {
                        Ok(Some(delivery)) => {
                            let id = delivery.id;
                            let outcome = handler(delivery).await;
                            if let Err(e) = broker.resolve(id, outcome).await {
                                warn!(error = %e, id, "failed to resolve delivery");
                            }
                        }
                        Ok(None) => tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await,
                        Err(e) => {
                            warn!(error = %e, "dequeue failed, backing off");
                            tokio::time::sleep(EMPTY_QUEUE_BACKOFF).await;
                        }
                    }
                }
            }));
        }

        debug!(exchange = %self.exchange, routing_key = %self.routing_key, prefetch = self.prefetch, "worker running");

        for slot in slots {
            let _ = slot.await;
        }
        Ok(())
    }
}
