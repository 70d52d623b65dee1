use serde::{Deserialize, Serialize};
use std::fmt;

/// The named exchanges the pipeline publishes/consumes on. Kept as an
/// explicit enum rather than stringly-typed names (per the design note on
/// replacing ad hoc dispatch with explicit tables) while still serializing
/// to the plain string the wire format names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Exchange {
    Feeds,
    Articles,
    Images,
    EventStream,
    ControllerRpc,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Feeds => "feeds",
            Exchange::Articles => "articles",
            Exchange::Images => "images",
            Exchange::EventStream => "event_stream",
            Exchange::ControllerRpc => "controller_rpc",
        }
    }

    /// `event_stream` is the only fanout exchange; everything else is direct
    /// (routing-key-addressed, one consumer per message).
    pub fn is_fanout(&self) -> bool {
        matches!(self, Exchange::EventStream)
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a worker handler tells the broker to do with the message it just
/// processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processed successfully; remove the message.
    Ack,
    /// Transient failure; make the message visible for redelivery.
    NackRequeue,
    /// Permanent failure (protocol error); discard without redelivery.
    RejectDrop,
}

/// One message handed to a worker handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub exchange: Exchange,
    pub routing_key: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
}

impl Delivery {
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
