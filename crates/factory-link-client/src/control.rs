//! Command client for the control endpoint.
//!
//! Submissions go over HTTP with an idempotency key; status changes arrive
//! asynchronously on a token-authenticated stream and are fanned out to every
//! registered handler, whichever call submitted the command.

use crate::http::{self, REQUEST_TIMEOUT};
use crate::listeners::{ListenerId, Listeners};
use crate::reconnect::{BackoffPolicy, Reconnector, Session};
use crate::{ClientError, lock};
use factory_link_core::{
    Capabilities, CommandSnapshot, CommandType, ConnectionState, ControlEvent, SubmitRequest,
};
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// Close code the control stream uses for a bad or missing token.
pub const AUTH_CLOSE_CODE: u16 = 4001;

/// Control endpoint settings.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    pub base_url: String,
    /// Static bearer token.
    pub token: String,
    pub request_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl ControlConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            request_timeout: REQUEST_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Result of a submission: the key that was sent and the server's view of the
/// command. A replayed key yields the existing command, indistinguishable from
/// a fresh one.
#[derive(Debug, Clone, PartialEq)]
pub struct Submitted {
    pub idempotency_key: String,
    pub command: CommandSnapshot,
}

/// Generate a fresh idempotency key.
pub fn idempotency_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct StatusSession {
    url: String,
    listeners: Arc<Listeners<CommandSnapshot>>,
}

fn is_auth_close(frame: Option<&CloseFrame>) -> bool {
    frame.is_some_and(|frame| u16::from(frame.code) == AUTH_CLOSE_CODE)
}

impl StatusSession {
    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ControlEvent>(text) {
            Ok(ControlEvent::CommandStatus(snapshot)) => {
                trace!(command = %snapshot.command_id, status = ?snapshot.status, "status event");
                self.listeners.emit(&snapshot);
            }
            Err(err) => debug!(error = %err, "dropping malformed status event"),
        }
    }
}

impl Session for StatusSession {
    type Link = WsStream;

    async fn open(&mut self) -> Result<WsStream, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(ClientError::from_ws)?;
        Ok(ws)
    }

    async fn serve(&mut self, mut ws: WsStream) -> Result<(), ClientError> {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(Message::Text(text)) => self.dispatch(text.as_str()),
                Ok(Message::Close(close)) => {
                    if is_auth_close(close.as_ref()) {
                        return Err(ClientError::Auth);
                    }
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => return Err(ClientError::Connection(err.to_string())),
            }
        }
        Ok(())
    }
}

/// Client for the command endpoint.
pub struct CommandClient {
    config: ControlConfig,
    http: reqwest::Client,
    stream_url: String,
    listeners: Arc<Listeners<CommandSnapshot>>,
    link: Reconnector,
}

impl CommandClient {
    pub fn new(config: ControlConfig) -> Result<Self, ClientError> {
        let stream_url = http::stream_endpoint(&config.base_url, &[("token", &config.token)])?;
        Ok(Self {
            http: http::build_http()?,
            link: Reconnector::new("control", config.backoff),
            stream_url,
            config,
            listeners: Arc::default(),
        })
    }

    /// State of the status stream.
    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Status stream links opened so far, reconnects included.
    pub fn connections(&self) -> u64 {
        self.link.connections()
    }

    /// Unauthenticated capability read.
    pub async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        let url = http::endpoint(&self.config.base_url, &["capabilities"])?;
        http::request_json(self.http.get(url), self.config.request_timeout).await
    }

    /// Submit a command. Uses `key` when given, otherwise a fresh UUID.
    pub async fn submit(
        &self,
        command_type: CommandType,
        payload: Value,
        key: Option<String>,
    ) -> Result<Submitted, ClientError> {
        let body = SubmitRequest {
            idempotency_key: key.unwrap_or_else(idempotency_key),
            command_type,
            payload,
        };
        let url = http::endpoint(&self.config.base_url, &["commands"])?;
        let request = self
            .http
            .post(url)
            .bearer_auth(&self.config.token)
            .json(&body);
        let command: CommandSnapshot =
            http::request_json(request, self.config.request_timeout).await?;
        debug!(
            command = %command.command_id,
            key = %body.idempotency_key,
            status = ?command.status,
            "command submitted"
        );
        Ok(Submitted {
            idempotency_key: body.idempotency_key,
            command,
        })
    }

    /// One-shot status read.
    pub async fn status(&self, command_id: &str) -> Result<CommandSnapshot, ClientError> {
        let url = http::endpoint(&self.config.base_url, &["commands", command_id])?;
        let request = self.http.get(url).bearer_auth(&self.config.token);
        http::request_json(request, self.config.request_timeout).await
    }

    /// Register a handler for every status event on the stream.
    pub fn on_event(
        &self,
        handler: impl Fn(&CommandSnapshot) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.add(handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Open the status stream and keep it open.
    pub async fn connect_stream(&self) -> Result<(), ClientError> {
        let session = StatusSession {
            url: self.stream_url.clone(),
            listeners: self.listeners.clone(),
        };
        self.link.connect(session).await
    }

    /// Stop reconnecting, close the stream and drop every handler.
    pub fn disconnect(&self) {
        self.link.disconnect();
        self.listeners.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    #[test]
    fn auth_close_detection() {
        let auth = CloseFrame {
            code: CloseCode::from(AUTH_CLOSE_CODE),
            reason: "bad token".into(),
        };
        let normal = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        assert!(is_auth_close(Some(&auth)));
        assert!(!is_auth_close(Some(&normal)));
        assert!(!is_auth_close(None));
    }

    #[test]
    fn status_events_fan_out() {
        let listeners: Arc<Listeners<CommandSnapshot>> = Arc::default();
        let session = StatusSession {
            url: String::new(),
            listeners: listeners.clone(),
        };
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = seen.clone();
            listeners.add(move |s: &CommandSnapshot| lock(&seen).push(s.command_id.clone()));
        }

        session.dispatch(
            r#"{"event":"COMMAND_STATUS","commandId":"c1","status":"RUNNING","result":null,"error":null}"#,
        );
        session.dispatch(r#"{"event":"SOMETHING_ELSE"}"#);
        session.dispatch(r#"{"commandId":"c2","status":"RUNNING"}"#);

        assert_eq!(*lock(&seen), vec!["c1".to_string(), "c1".to_string()]);
    }

    #[test]
    fn keys_are_unique() {
        assert_ne!(idempotency_key(), idempotency_key());
    }

    #[test]
    fn stream_url_carries_token() {
        let client =
            CommandClient::new(ControlConfig::new("http://127.0.0.1:8081", "tok en")).unwrap();
        assert_eq!(client.stream_url, "ws://127.0.0.1:8081/stream?token=tok+en");
    }
}
