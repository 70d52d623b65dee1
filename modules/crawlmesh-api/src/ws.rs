//! Per-connection websocket handler (spec §4.6): authenticate, reject a
//! second simultaneous connection for the same recsystem, handshake with a
//! `ping`/`pong` RPC call, then multiplex outbound event notifications and
//! outbound RPC calls against inbound JSON-RPC requests and responses from
//! the peer.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::rpc::RpcServer;
use crate::token::{parse_bearer, Role};
use crate::AppState;
use crawlmesh_eventstream::Event;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn handler(ws: WebSocketUpgrade, State(app): State<AppState>, headers: HeaderMap) -> Response {
    let claims = match authenticate(&app, &headers) {
        Ok(claims) => claims,
        Err(status) => return status.into_response(),
    };

    if claims.role != Role::Recsystem {
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "role must be recsystem" }))).into_response();
    }

    let queue = match app.hub.connect(&claims.recsystem_id) {
        Ok(queue) => queue,
        Err(_) => {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "multiple simultaneous connections for this recsystem are not allowed" })),
            )
                .into_response();
        }
    };

    let recsystem_id = claims.recsystem_id;
    ws.on_upgrade(move |socket| async move {
        run_connection(socket, app.clone(), recsystem_id.clone(), queue).await;
        app.hub.disconnect(&recsystem_id);
    })
}

fn authenticate(app: &AppState, headers: &HeaderMap) -> Result<crate::token::Claims, StatusCode> {
    let raw = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).ok_or(StatusCode::UNAUTHORIZED)?;
    let token = parse_bearer(raw).ok_or(StatusCode::UNAUTHORIZED)?;
    app.issuer.verify(token).map_err(|_| StatusCode::UNAUTHORIZED)
}

type Writer = SplitSink<WebSocket, Message>;

/// Generic bidirectional JSON-RPC multiplexer for one websocket connection.
/// A single reader task owns the socket's read half and demuxes every
/// inbound frame: a frame carrying `method` is a request and goes to the
/// dispatcher, anything else is treated as a response to one of our own
/// outbound calls and is routed onto its waiter by `id` (or, for a batch
/// response, the first element's `id`). Outbound calls register their
/// waiter in `pending` before the frame is sent, so a reply can never race
/// ahead of its own registration.
struct RpcMux {
    writer: AsyncMutex<Writer>,
    pending: AsyncMutex<HashMap<Value, oneshot::Sender<Result<Value, String>>>>,
    next_id: AtomicI64,
}

impl RpcMux {
    fn new(writer: Writer) -> Self {
        Self { writer: AsyncMutex::new(writer), pending: AsyncMutex::new(HashMap::new()), next_id: AtomicI64::new(1) }
    }

    /// Issues a request and waits for its matching response.
    async fn call(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = Value::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = self.send(&frame).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(anyhow::anyhow!("{method} failed: {message}")),
            Err(_) => Err(anyhow::anyhow!("connection closed while awaiting a reply to {method}")),
        }
    }

    /// Sends a request with no id, for traffic that never expects a reply.
    async fn notify(&self, method: &str, params: Value) -> anyhow::Result<()> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method, "params": params })).await
    }

    async fn reply(&self, id: Value, outcome: Result<Value, String>) -> anyhow::Result<()> {
        let frame = match outcome {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(message) => json!({ "jsonrpc": "2.0", "id": id, "error": { "message": message } }),
        };
        self.send(&frame).await
    }

    async fn send(&self, value: &Value) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(Message::Text(serde_json::to_string(value)?.into())).await?;
        Ok(())
    }

    /// Routes a decoded response outcome onto the waiter registered under
    /// its `id`, if one is still pending. A response with no matching
    /// waiter (already timed out, or never ours) is dropped.
    async fn resolve(&self, id: &Value, outcome: Result<Value, String>) {
        if let Some(tx) = self.pending.lock().await.remove(id) {
            let _ = tx.send(outcome);
        }
    }

    /// Drops every outstanding waiter so each `call` in flight observes the
    /// connection closing instead of hanging until its own timeout.
    async fn close(&self) {
        self.pending.lock().await.clear();
    }
}

async fn run_connection(
    socket: WebSocket,
    app: AppState,
    recsystem_id: String,
    queue: std::sync::Arc<crawlmesh_eventstream::EventQueue>,
) {
    let (sender, receiver) = socket.split();
    let mux = Arc::new(RpcMux::new(sender));

    let mut reader = tokio::spawn(demux_inbound(mux.clone(), app.rpc.clone(), receiver));

    match tokio::time::timeout(PING_TIMEOUT, mux.call("ping", json!({}))).await {
        Ok(Ok(result)) if result.as_str() == Some("pong") => {}
        Ok(Ok(other)) => {
            warn!(%recsystem_id, ?other, "handshake: expected pong, got something else");
            reader.abort();
            return;
        }
        Ok(Err(e)) => {
            warn!(%recsystem_id, error = %e, "handshake: ping call failed");
            reader.abort();
            return;
        }
        Err(_) => {
            warn!(%recsystem_id, "handshake: no pong within timeout");
            reader.abort();
            return;
        }
    }

    info!(%recsystem_id, "recsystem connected");

    loop {
        tokio::select! {
            event = queue.pop() => {
                if let Some((method, params)) = notify_for(&event) {
                    if mux.notify(method, params).await.is_err() {
                        break;
                    }
                } else {
                    warn!(event_type = %event.event_type, "unknown event type, skipping");
                }
            }
            _ = &mut reader => break,
        }
    }

    reader.abort();
    mux.close().await;
    info!(%recsystem_id, "recsystem disconnected");
}

/// The connection's single reader task: owns the socket's read half for its
/// whole lifetime and demuxes every inbound frame onto either the request
/// dispatcher or a pending local call.
async fn demux_inbound(mux: Arc<RpcMux>, rpc: Arc<RpcServer>, mut receiver: SplitStream<WebSocket>) {
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = handle_frame(&mux, &rpc, &text).await {
                    warn!(error = %e, "failed to handle inbound rpc frame");
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(error = %e, "websocket read error");
                break;
            }
            Some(Ok(_)) => {}
        }
    }
    mux.close().await;
}

async fn handle_frame(mux: &RpcMux, rpc: &RpcServer, text: &str) -> anyhow::Result<()> {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            // Not valid JSON at all; there is no well-formed fallback
            // handler to hand this to, so just log and move on.
            warn!(error = %e, "inbound frame is not valid json");
            return Ok(());
        }
    };

    if let Some(method) = frame.get("method").and_then(Value::as_str) {
        let id = frame.get("id").cloned().unwrap_or(Value::Null);
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        let outcome = rpc.dispatch(method, params).await.map_err(|e| e.to_string());
        return mux.reply(id, outcome).await;
    }

    // Not a request: a response to one of our own outbound calls. A batch
    // response is identified by its first element's id.
    let response_id = match &frame {
        Value::Array(items) => items.first().and_then(|item| item.get("id")).cloned(),
        Value::Object(_) => frame.get("id").cloned(),
        _ => None,
    };

    let Some(id) = response_id else {
        warn!("inbound frame has neither method nor id, dropping");
        return Ok(());
    };

    let outcome = match &frame {
        Value::Object(map) => match map.get("error") {
            Some(err) => Err(err.get("message").and_then(Value::as_str).unwrap_or("rpc error").to_string()),
            None => Ok(map.get("result").cloned().unwrap_or(Value::Null)),
        },
        other => Ok(other.clone()),
    };

    mux.resolve(&id, outcome).await;
    Ok(())
}

/// `handle_<lowercase(type)>_event` dispatch, spec §4.6 step 4.
fn notify_for(event: &Event) -> Option<(&'static str, Value)> {
    match event.event_type.as_str() {
        "NEW_ARTICLE" => Some(("new_article", json!({ "article": event.payload }))),
        "ARTICLE_INTERACTION" => Some(("article_interaction", json!({ "interaction": event.payload }))),
        _ => None,
    }
}
