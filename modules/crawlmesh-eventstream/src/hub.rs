//! `Hub` — the in-memory `connected[recsystem_id] -> Queue<Event>` table
//! the fan-out process and every websocket connection handler share
//! (spec §4.6).

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Per-recsystem queue depth. Once full, the oldest pending event is
/// dropped to make room for the newest — a slow or wedged consumer loses
/// history rather than stalling the dispatcher.
const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: Value,
    /// `None` broadcasts to every connected recsystem; `Some` restricts
    /// delivery to the listed ids, silently skipping ones not connected.
    #[serde(default)]
    pub targets: Option<Vec<String>>,
}

pub struct EventQueue {
    inner: Mutex<VecDeque<Event>>,
    notify: Notify,
}

impl EventQueue {
    fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)), notify: Notify::new() }
    }

    fn push(&self, event: Event) {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= QUEUE_CAPACITY {
            q.pop_front();
        }
        q.push_back(event);
        drop(q);
        self.notify.notify_one();
    }

    /// Pop the next event, waiting if the queue is empty.
    pub async fn pop(&self) -> Event {
        loop {
            if let Some(event) = self.inner.lock().unwrap().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

#[derive(Debug)]
pub struct AlreadyConnected;

#[derive(Default)]
pub struct Hub {
    connected: DashMap<String, Arc<EventQueue>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a queue for `recsystem_id`. Fails if one is already
    /// connected — the spec requires rejecting a second simultaneous
    /// connection with HTTP 403, not replacing the first.
    pub fn connect(&self, recsystem_id: &str) -> Result<Arc<EventQueue>, AlreadyConnected> {
        use dashmap::mapref::entry::Entry;
        match self.connected.entry(recsystem_id.to_string()) {
            Entry::Occupied(_) => Err(AlreadyConnected),
            Entry::Vacant(slot) => {
                let queue = Arc::new(EventQueue::new());
                slot.insert(queue.clone());
                Ok(queue)
            }
        }
    }

    pub fn disconnect(&self, recsystem_id: &str) {
        self.connected.remove(recsystem_id);
    }

    pub fn is_connected(&self, recsystem_id: &str) -> bool {
        self.connected.contains_key(recsystem_id)
    }

    /// `dispatchLoop` body: fan the event out to every connected queue, or
    /// just the listed targets that happen to be connected.
    pub fn dispatch(&self, event: Event) {
        match &event.targets {
            None => {
                for entry in self.connected.iter() {
                    entry.value().push(event.clone());
                }
            }
            Some(targets) => {
                for id in targets {
                    if let Some(queue) = self.connected.get(id) {
                        queue.push(event.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let hub = Hub::new();
        let a = hub.connect("a").unwrap();
        let b = hub.connect("b").unwrap();

        hub.dispatch(Event { event_type: "NEW_ARTICLE".into(), payload: Value::Null, targets: None });

        assert_eq!(a.pop().await.event_type, "NEW_ARTICLE");
        assert_eq!(b.pop().await.event_type, "NEW_ARTICLE");
    }

    #[tokio::test]
    async fn targeted_event_skips_other_connections() {
        let hub = Hub::new();
        let a = hub.connect("a").unwrap();
        let _b = hub.connect("b").unwrap();

        hub.dispatch(Event {
            event_type: "ARTICLE_INTERACTION".into(),
            payload: Value::Null,
            targets: Some(vec!["a".to_string()]),
        });

        assert_eq!(a.pop().await.event_type, "ARTICLE_INTERACTION");
    }

    #[test]
    fn second_connection_for_same_id_is_rejected() {
        let hub = Hub::new();
        let _first = hub.connect("a").unwrap();
        assert!(hub.connect("a").is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_oldest() {
        let queue = EventQueue::new();
        for i in 0..QUEUE_CAPACITY + 1 {
            queue.push(Event { event_type: i.to_string(), payload: Value::Null, targets: None });
        }
        let first = queue.pop().await;
        assert_eq!(first.event_type, "1");
    }
}
