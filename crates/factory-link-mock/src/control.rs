//! Control endpoint: capabilities, idempotent commands, status stream.

use crate::MockState;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::Response,
    routing::{get, post},
};
use factory_link_core::{
    Capabilities, CommandSnapshot, CommandStatus, ControlEvent, SubmitRequest,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const AUTH_CLOSE_CODE: u16 = 4001;

#[derive(Debug, Clone)]
pub(crate) enum Feed {
    Event(String),
    Drop,
}

struct Entry {
    snapshot: CommandSnapshot,
    step: usize,
}

/// Commands by id, plus the key → id index that makes creation idempotent.
#[derive(Default)]
pub(crate) struct CommandBook {
    by_key: HashMap<String, String>,
    commands: HashMap<String, Entry>,
    next_id: u64,
}

impl CommandBook {
    /// Returns the command and whether it was created by this call. A known
    /// key returns the existing command whatever the payload.
    fn create(&mut self, request: &SubmitRequest) -> (CommandSnapshot, bool) {
        if let Some(id) = self.by_key.get(&request.idempotency_key)
            && let Some(entry) = self.commands.get(id)
        {
            return (entry.snapshot.clone(), false);
        }
        self.next_id += 1;
        let snapshot = CommandSnapshot {
            command_id: format!("cmd-{}", self.next_id),
            status: CommandStatus::Queued,
            result: None,
            error: None,
        };
        self.by_key
            .insert(request.idempotency_key.clone(), snapshot.command_id.clone());
        self.commands.insert(
            snapshot.command_id.clone(),
            Entry {
                snapshot: snapshot.clone(),
                step: 0,
            },
        );
        (snapshot, true)
    }

    fn advance(&mut self, id: &str, script: &[CommandStatus]) -> Option<CommandSnapshot> {
        let entry = self.commands.get_mut(id)?;
        let status = *script.get(entry.step)?;
        entry.step += 1;
        entry.snapshot.status = status;
        match status {
            CommandStatus::Succeeded => entry.snapshot.result = Some(json!({ "ok": true })),
            CommandStatus::Failed => entry.snapshot.error = Some("scripted failure".to_string()),
            CommandStatus::Queued | CommandStatus::Running => {}
        }
        Some(entry.snapshot.clone())
    }

    pub(crate) fn get(&self, id: &str) -> Option<CommandSnapshot> {
        self.commands.get(id).map(|entry| entry.snapshot.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }
}

pub(crate) async fn advance(state: &MockState, id: &str) -> Option<CommandSnapshot> {
    let snapshot = state
        .commands
        .write()
        .await
        .advance(id, &state.config.script)?;
    match serde_json::to_string(&ControlEvent::CommandStatus(snapshot.clone())) {
        Ok(text) => {
            let _ = state.status_feed.send(Feed::Event(text));
        }
        Err(err) => tracing::warn!(error = %err, "cannot encode status event"),
    }
    Some(snapshot)
}

pub(crate) fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/capabilities", get(capabilities))
        .route("/commands", post(create_command))
        .route("/commands/{id}", get(get_command))
        .route("/stream", get(stream))
        .with_state(state)
}

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), StatusCode> {
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if presented == Some(token) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn capabilities(State(state): State<Arc<MockState>>) -> Json<Capabilities> {
    state.hit("capabilities").await;
    state.pause().await;
    Json(state.config.capabilities.clone())
}

async fn create_command(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<CommandSnapshot>, StatusCode> {
    state.hit("commands").await;
    state.pause().await;
    authorize(&headers, &state.config.token)?;

    let (snapshot, created) = state.commands.write().await.create(&request);
    if created {
        tracing::info!(
            command = %snapshot.command_id,
            command_type = %request.command_type,
            "command queued"
        );
        if let Some(every) = state.config.auto_advance {
            tokio::spawn(walk(state.clone(), snapshot.command_id.clone(), every));
        }
    }
    Ok(Json(snapshot))
}

async fn walk(state: Arc<MockState>, id: String, every: Duration) {
    loop {
        tokio::time::sleep(every).await;
        if advance(&state, &id).await.is_none() {
            return;
        }
    }
}

async fn get_command(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CommandSnapshot>, StatusCode> {
    state.hit("status").await;
    state.pause().await;
    authorize(&headers, &state.config.token)?;
    state
        .commands
        .read()
        .await
        .get(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct StreamQuery {
    token: Option<String>,
}

async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<MockState>>,
    Query(query): Query<StreamQuery>,
) -> Response {
    state.hit("control-stream").await;
    let authorized = query.token.as_deref() == Some(state.config.token.as_str());
    ws.on_upgrade(move |socket| serve_stream(socket, state, authorized))
}

async fn serve_stream(mut socket: WebSocket, state: Arc<MockState>, authorized: bool) {
    if !authorized {
        let close = CloseFrame {
            code: AUTH_CLOSE_CODE,
            reason: "invalid token".into(),
        };
        let _ = socket.send(Message::Close(Some(close))).await;
        tracing::debug!("refused control stream with bad token");
        return;
    }

    let mut feed = state.status_feed.subscribe();
    let (mut sink, mut inbound) = socket.split();
    loop {
        tokio::select! {
            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            item = feed.recv() => match item {
                Ok(Feed::Event(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
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
    tracing::debug!("control stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use factory_link_core::CommandType;

    fn request(key: &str) -> SubmitRequest {
        SubmitRequest {
            idempotency_key: key.to_string(),
            command_type: CommandType::ResetFuse,
            payload: json!({ "circuitId": 1 }),
        }
    }

    #[test]
    fn known_key_returns_existing_command() {
        let mut book = CommandBook::default();
        let (first, created) = book.create(&request("k1"));
        assert!(created);
        let mut replay = request("k1");
        replay.payload = json!({ "circuitId": 9 });
        let (second, created) = book.create(&replay);
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(book.len(), 1);

        let (third, _) = book.create(&request("k2"));
        assert_ne!(third.command_id, first.command_id);
    }

    #[test]
    fn advance_follows_script_then_stops() {
        let mut book = CommandBook::default();
        let (command, _) = book.create(&request("k"));
        let script = [CommandStatus::Running, CommandStatus::Failed];

        let step = book.advance(&command.command_id, &script).unwrap();
        assert_eq!(step.status, CommandStatus::Running);
        let step = book.advance(&command.command_id, &script).unwrap();
        assert_eq!(step.status, CommandStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("scripted failure"));
        assert!(book.advance(&command.command_id, &script).is_none());
        assert!(book.advance("cmd-missing", &script).is_none());
    }

    #[test]
    fn bearer_check() {
        let mut headers = HeaderMap::new();
        assert_eq!(authorize(&headers, "t"), Err(StatusCode::UNAUTHORIZED));
        headers.insert(header::AUTHORIZATION, "Bearer t".parse().unwrap());
        assert_eq!(authorize(&headers, "t"), Ok(()));
        assert_eq!(authorize(&headers, "u"), Err(StatusCode::UNAUTHORIZED));
    }
}
