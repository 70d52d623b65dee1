//! Request/response RPC layered on the same durable-queue primitive as
//! ordinary publish/worker traffic: a `correlation_id` column and a
//! `reply_to` side channel, polled the same way as a normal dequeue.

use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::broker::Broker;
use crate::error::BrokerError;
use crate::types::{Exchange, HandlerOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Client side of an RPC exchange: issues `call(method, params)` and blocks
/// for the matching reply or a timeout.
pub struct RpcClient {
    broker: Broker,
    exchange: Exchange,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(broker: Broker, exchange: Exchange, timeout: Duration) -> Self {
        Self { broker, exchange, timeout }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BrokerError> {
        let correlation_id = Uuid::new_v4().to_string();
        let reply_to = format!("reply:{correlation_id}");

        let publisher = self.broker.publisher(self.exchange);
        publisher
            .publish_with_correlation(method, params, &correlation_id, &reply_to)
            .await?;

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if let Some(reply) = self.broker.take_reply(&reply_to, &correlation_id).await? {
                return Ok(reply);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrokerError::RpcTimeout {
                    method: method.to_string(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Server side of an RPC exchange: services every method bound to one queue.
pub struct RpcEndpoint {
    broker: Broker,
    exchange: Exchange,
}

impl RpcEndpoint {
    pub fn new(broker: Broker, exchange: Exchange) -> Self {
        Self { broker, exchange }
    }

    /// Run until the process is torn down. `handler` receives the routing
    /// key (method name) and the request payload, and returns the reply
    /// body. A handler that cannot service the request still returns a
    /// `{"error": "..."}` value — RPC requests are always acked; there is no
    /// requeue semantics for request/response traffic.
    pub async fn run<F, Fut>(self, handler: F) -> Result<(), BrokerError>
    where
        F: Fn(String, Value) -> Fut,
        Fut: Future<Output = Value>,
    {
        loop {
            match self.broker.dequeue_any(self.exchange).await? {
                Some(delivery) => {
                    let id = delivery.id;
                    let response = handler(delivery.routing_key, delivery.payload).await;
                    if let (Some(reply_to), Some(correlation_id)) =
                        (delivery.reply_to.as_deref(), delivery.correlation_id.as_deref())
                    {
                        self.broker
                            .publish_reply(reply_to, correlation_id, &response)
                            .await?;
                    }
                    self.broker.resolve(id, HandlerOutcome::Ack).await?;
                }
                None => tokio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }
}
