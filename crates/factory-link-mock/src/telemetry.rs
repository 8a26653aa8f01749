//! Telemetry endpoint: topic pulls and the subscription-filtered stream.

use crate::MockState;
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::Response,
    routing::get,
};
use factory_link_core::Topic;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Clone)]
pub(crate) enum Feed {
    Frame { topic: Topic, text: String },
    Drop,
}

#[derive(Default)]
pub(crate) struct TelemetryData {
    pub(crate) bodies: HashMap<Topic, Value>,
    pub(crate) frames: Vec<Value>,
    connections: HashMap<u64, BTreeSet<Topic>>,
    next_connection: u64,
}

impl TelemetryData {
    pub(crate) fn subscribed(&self) -> BTreeSet<Topic> {
        self.connections.values().flatten().copied().collect()
    }
}

#[derive(Deserialize)]
struct SubscriptionFrame {
    action: String,
    endpoints: Vec<Topic>,
}

pub(crate) fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/{endpoint}", get(topic))
        .with_state(state)
}

async fn topic(
    State(state): State<Arc<MockState>>,
    Path(endpoint): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let topic: Topic = endpoint.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    state.hit(topic.as_str()).await;
    state.pause().await;
    let body = state
        .telemetry
        .read()
        .await
        .bodies
        .get(&topic)
        .cloned()
        .unwrap_or_else(|| json!([]));
    Ok(Json(body))
}

async fn stream(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    state.hit("telemetry-stream").await;
    ws.on_upgrade(move |socket| serve_stream(socket, state))
}

async fn serve_stream(socket: WebSocket, state: Arc<MockState>) {
    let mut feed = state.telemetry_feed.subscribe();
    let id = {
        let mut data = state.telemetry.write().await;
        let id = data.next_connection;
        data.next_connection += 1;
        data.connections.insert(id, BTreeSet::new());
        id
    };
    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => apply(&state, id, text.as_str()).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            item = feed.recv() => match item {
                Ok(Feed::Frame { topic, text }) => {
                    let wanted = state
                        .telemetry
                        .read()
                        .await
                        .connections
                        .get(&id)
                        .is_some_and(|topics| topics.contains(&topic));
                    if wanted && sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Feed::Drop) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    }

    state.telemetry.write().await.connections.remove(&id);
    tracing::debug!(connection = id, "telemetry stream closed");
}

async fn apply(state: &MockState, id: u64, text: &str) {
    let Ok(raw) = serde_json::from_str::<Value>(text) else {
        tracing::warn!("non-JSON frame on telemetry stream");
        return;
    };
    let mut data = state.telemetry.write().await;
    data.frames.push(raw.clone());
    let frame: SubscriptionFrame = match serde_json::from_value(raw) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(error = %err, "invalid subscription frame");
            return;
        }
    };
    let Some(topics) = data.connections.get_mut(&id) else {
        return;
    };
    match frame.action.as_str() {
        "subscribe" => topics.extend(frame.endpoints),
        "unsubscribe" => {
            for topic in &frame.endpoints {
                topics.remove(topic);
            }
        }
        other => tracing::warn!(action = other, "unknown subscription action"),
    }
}
