//! In-memory mock of the factory mod's two endpoints.
//!
//! The telemetry side serves `GET /<topic>` from stored bodies and a `/stream`
//! socket that forwards pushed frames to connections subscribed to their
//! topic. The control side serves the capability document, idempotent
//! `POST /commands`, `GET /commands/{id}` and a token-checked status stream.
//! Commands walk a scripted list of statuses, one step per [`MockServer::advance`]
//! or automatically when `auto_advance` is set.
//!
//! Every handled request bumps a counter readable through
//! [`MockServer::requests`]. Route names are the topic endpoint names plus
//! `capabilities`, `commands`, `status`, `telemetry-stream` and
//! `control-stream`.

mod control;
mod sample;
mod telemetry;

pub use sample::{power_body, sample_topics};

use factory_link_core::{Capabilities, CommandSnapshot, CommandStatus, CommandType, Limits, Topic};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

/// Behavior of a mock instance.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Bearer token the control side accepts.
    pub token: String,
    pub capabilities: Capabilities,
    /// Statuses a command takes after `QUEUED`, one per advance.
    pub script: Vec<CommandStatus>,
    /// Walk the script on its own, one step per interval.
    pub auto_advance: Option<Duration>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            token: "test-token".to_string(),
            capabilities: Capabilities {
                version: "0.1.0".to_string(),
                features: CommandType::ALL
                    .iter()
                    .map(|ty| (ty.feature().to_string(), true))
                    .collect(),
                limits: Limits::default(),
            },
            script: vec![CommandStatus::Running, CommandStatus::Succeeded],
            auto_advance: None,
        }
    }
}

impl MockConfig {
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_feature(mut self, flag: &str, enabled: bool) -> Self {
        self.capabilities.features.insert(flag.to_string(), enabled);
        self
    }

    pub fn with_commands_per_second(mut self, ceiling: u32) -> Self {
        self.capabilities.limits.commands_per_second = ceiling;
        self
    }

    pub fn with_script(mut self, script: Vec<CommandStatus>) -> Self {
        self.script = script;
        self
    }

    pub fn with_auto_advance(mut self, every: Duration) -> Self {
        self.auto_advance = Some(every);
        self
    }
}

pub(crate) struct MockState {
    pub(crate) config: MockConfig,
    pub(crate) telemetry: RwLock<telemetry::TelemetryData>,
    pub(crate) commands: RwLock<control::CommandBook>,
    pub(crate) telemetry_feed: broadcast::Sender<telemetry::Feed>,
    pub(crate) status_feed: broadcast::Sender<control::Feed>,
    hits: RwLock<HashMap<String, usize>>,
    delay: RwLock<Duration>,
}

impl MockState {
    fn new(config: MockConfig) -> Self {
        let (telemetry_feed, _) = broadcast::channel(256);
        let (status_feed, _) = broadcast::channel(256);
        Self {
            config,
            telemetry: RwLock::default(),
            commands: RwLock::default(),
            telemetry_feed,
            status_feed,
            hits: RwLock::default(),
            delay: RwLock::new(Duration::ZERO),
        }
    }

    pub(crate) async fn hit(&self, route: &str) {
        *self.hits.write().await.entry(route.to_string()).or_default() += 1;
    }

    /// Hold a response for the configured delay.
    pub(crate) async fn pause(&self) {
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// A running mock. Both listeners stop when it is dropped.
pub struct MockServer {
    state: Arc<MockState>,
    telemetry_addr: SocketAddr,
    control_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl MockServer {
    /// Start on two ephemeral localhost ports.
    pub async fn start(config: MockConfig) -> anyhow::Result<Self> {
        let any = SocketAddr::from(([127, 0, 0, 1], 0));
        Self::bind(config, any, any).await
    }

    pub async fn bind(
        config: MockConfig,
        telemetry_addr: SocketAddr,
        control_addr: SocketAddr,
    ) -> anyhow::Result<Self> {
        let state = Arc::new(MockState::new(config));

        let telemetry_listener = TcpListener::bind(telemetry_addr).await?;
        let control_listener = TcpListener::bind(control_addr).await?;
        let telemetry_addr = telemetry_listener.local_addr()?;
        let control_addr = control_listener.local_addr()?;

        let tasks = vec![
            serve(
                "telemetry",
                telemetry_listener,
                telemetry::router(state.clone()),
            ),
            serve("control", control_listener, control::router(state.clone())),
        ];
        tracing::info!(%telemetry_addr, %control_addr, "mock endpoints listening");

        Ok(Self {
            state,
            telemetry_addr,
            control_addr,
            tasks,
        })
    }

    pub fn telemetry_url(&self) -> String {
        format!("http://{}", self.telemetry_addr)
    }

    pub fn control_url(&self) -> String {
        format!("http://{}", self.control_addr)
    }

    pub fn token(&self) -> &str {
        &self.state.config.token
    }

    /// Body served by `GET /<topic>`. Defaults to `[]`.
    pub async fn set_topic(&self, topic: Topic, body: Value) {
        self.state.telemetry.write().await.bodies.insert(topic, body);
    }

    /// Send `frame` to every stream connection subscribed to `topic`. The
    /// topic only routes the frame; nothing is added to it on the wire.
    pub fn push(&self, topic: Topic, frame: &Value) {
        let _ = self.state.telemetry_feed.send(telemetry::Feed::Frame {
            topic,
            text: frame.to_string(),
        });
    }

    /// Union of the topics live stream connections are subscribed to.
    pub async fn subscribed(&self) -> BTreeSet<Topic> {
        self.state.telemetry.read().await.subscribed()
    }

    /// Every subscription frame received so far, in arrival order.
    pub async fn subscription_frames(&self) -> Vec<Value> {
        self.state.telemetry.read().await.frames.clone()
    }

    pub async fn requests(&self, route: &str) -> usize {
        self.state.hits.read().await.get(route).copied().unwrap_or(0)
    }

    /// Delay every HTTP response by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        *self.state.delay.write().await = delay;
    }

    /// Close every open stream connection on both endpoints.
    pub fn drop_streams(&self) {
        let _ = self.state.telemetry_feed.send(telemetry::Feed::Drop);
        let _ = self.state.status_feed.send(control::Feed::Drop);
    }

    pub fn telemetry_connections(&self) -> usize {
        self.state.telemetry_feed.receiver_count()
    }

    pub fn control_connections(&self) -> usize {
        self.state.status_feed.receiver_count()
    }

    /// Move `command_id` one step along the script and publish the change.
    /// `None` once the script is exhausted or the command is unknown.
    pub async fn advance(&self, command_id: &str) -> Option<CommandSnapshot> {
        control::advance(&self.state, command_id).await
    }

    pub async fn command(&self, command_id: &str) -> Option<CommandSnapshot> {
        self.state.commands.read().await.get(command_id)
    }

    /// Number of distinct commands created.
    pub async fn command_count(&self) -> usize {
        self.state.commands.read().await.len()
    }

    /// Publish raw text on the status stream, bypassing the command book.
    pub fn emit_raw_status(&self, text: impl Into<String>) {
        let _ = self
            .state
            .status_feed
            .send(control::Feed::Event(text.into()));
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn serve(name: &'static str, listener: TcpListener, app: axum::Router) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            tracing::warn!(endpoint = name, error = %err, "mock endpoint stopped");
        }
    })
}
