//! Consumes the `event_stream` exchange and fans each event out through the
//! shared [`Hub`] (spec §4.6 `dispatchLoop`).

use crawlmesh_broker::{Broker, Exchange, HandlerOutcome};
use std::sync::Arc;
use tracing::warn;

use crate::hub::{Event, Hub};

pub const ROUTING_KEY: &str = "event";

pub async fn run(hub: Arc<Hub>, broker: Broker) -> Result<(), crawlmesh_broker::BrokerError> {
    let worker = broker.worker(Exchange::EventStream, ROUTING_KEY).with_prefetch(1);
    worker
        .run(move |delivery| {
            let hub = hub.clone();
            async move {
                match delivery.payload_as::<Event>() {
                    Ok(event) => {
                        hub.dispatch(event);
                        HandlerOutcome::Ack
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed event_stream payload, dropping");
                        HandlerOutcome::RejectDrop
                    }
                }
            }
        })
        .await
}
