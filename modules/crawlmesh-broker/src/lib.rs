//! Typed publish/worker/RPC primitives over named exchanges, backed by
//! Postgres durable queues instead of a dedicated message-broker dependency.

pub mod broker;
pub mod error;
pub mod rpc;
pub mod types;

pub use broker::{migrate, Broker, Publisher, Worker};
pub use error::BrokerError;
pub use rpc::{RpcClient, RpcEndpoint};
pub use types::{Delivery, Exchange, HandlerOutcome};
