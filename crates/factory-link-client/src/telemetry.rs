//! Telemetry client: push stream plus on-demand pulls.
//!
//! Stream frames are classified by shape and decoded before they reach
//! listeners; frames that fail either step are dropped and never end the
//! session. The subscription set is replayed on every (re)connect.

use crate::http::{self, REQUEST_TIMEOUT};
use crate::listeners::{ListenerId, Listeners};
use crate::reconnect::{BackoffPolicy, Reconnector, Session};
use crate::{ClientError, lock};
use factory_link_core::records::{
    Belt, Drone, Generator, Machine, PowerCircuit, ProdStat, SessionInfo, StorageContainer, Train,
};
use factory_link_core::{
    ConnectionState, TelemetryEvent, Topic, TopicRecord, ValidationError, records_of,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

/// Telemetry endpoint settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// HTTP base, e.g. `http://localhost:8080`. The stream lives at
    /// `/stream` on the same host.
    pub base_url: String,
    pub request_timeout: Duration,
    /// When set, `connect()` also starts reconciliation polling.
    pub poll_interval: Option<Duration>,
    pub backoff: BackoffPolicy,
}

impl TelemetryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: REQUEST_TIMEOUT,
            poll_interval: None,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = Some(every);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

fn subscription_frame(action: &str, topics: &[Topic]) -> Message {
    let endpoints: Vec<Value> = topics.iter().map(|t| Value::from(t.as_str())).collect();
    let frame = json!({ "action": action, "endpoints": endpoints });
    Message::Text(frame.to_string().into())
}

#[derive(Default)]
struct StreamState {
    topics: BTreeSet<Topic>,
    /// Present only while a session is being served.
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

#[derive(Default)]
struct Shared {
    stream: Mutex<StreamState>,
    listeners: Listeners<TelemetryEvent>,
}

impl Shared {
    fn topics(&self) -> Vec<Topic> {
        lock(&self.stream).topics.iter().copied().collect()
    }

    fn dispatch(&self, text: &str) {
        match TelemetryEvent::from_frame(text) {
            Ok(event) => {
                trace!(topic = %event.topic(), records = event.len(), "telemetry frame");
                self.listeners.emit(&event);
            }
            Err(err) => debug!(error = %err, "dropping telemetry frame"),
        }
    }
}

#[derive(Clone)]
struct Puller {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl Puller {
    async fn raw(&self, topic: Topic) -> Result<Vec<Value>, ClientError> {
        let url = http::endpoint(&self.base_url, &[topic.as_str()])?;
        let body: Value = http::request_json(self.http.get(url), self.timeout).await?;
        records_of(body).ok_or_else(|| {
            ClientError::Protocol(format!("{topic} returned neither an array nor an object"))
        })
    }

    async fn event(&self, topic: Topic) -> Result<TelemetryEvent, ClientError> {
        let records = self.raw(topic).await?;
        Ok(TelemetryEvent::decode(topic, records)?)
    }

    async fn records<T: TopicRecord>(&self) -> Result<Vec<T>, ClientError> {
        let records = self.raw(T::TOPIC).await?;
        serde_json::from_value(Value::Array(records))
            .map_err(|e| ValidationError::schema(T::TOPIC, e).into())
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct StreamSession {
    url: String,
    shared: Arc<Shared>,
}

impl Session for StreamSession {
    type Link = WsStream;

    async fn open(&mut self) -> Result<WsStream, ClientError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(ClientError::from_ws)?;
        Ok(ws)
    }

    async fn serve(&mut self, ws: WsStream) -> Result<(), ClientError> {
        let (mut sink, mut frames) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut stream = lock(&self.shared.stream);
            if !stream.topics.is_empty() {
                let topics: Vec<Topic> = stream.topics.iter().copied().collect();
                let _ = tx.send(subscription_frame("subscribe", &topics));
            }
            stream.outbound = Some(tx);
        }

        let result = loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.shared.dispatch(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Err(ClientError::Connection(err.to_string())),
                },
                Some(message) = rx.recv() => {
                    if let Err(err) = sink.send(message).await {
                        break Err(ClientError::Connection(err.to_string()));
                    }
                }
            }
        };

        lock(&self.shared.stream).outbound = None;
        result
    }
}

/// Client for the read-only telemetry endpoint.
pub struct TelemetryClient {
    config: TelemetryConfig,
    stream_url: String,
    puller: Puller,
    shared: Arc<Shared>,
    link: Reconnector,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryClient {
    pub fn new(config: TelemetryConfig) -> Result<Self, ClientError> {
        let stream_url = http::stream_endpoint(&config.base_url, &[])?;
        let puller = Puller {
            http: http::build_http()?,
            base_url: config.base_url.clone(),
            timeout: config.request_timeout,
        };
        Ok(Self {
            link: Reconnector::new("telemetry", config.backoff),
            config,
            stream_url,
            puller,
            shared: Arc::default(),
            poller: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.link.state()
    }

    /// Current subscription set, sorted.
    pub fn subscriptions(&self) -> Vec<Topic> {
        self.shared.topics()
    }

    /// Register a handler for every decoded event, from the stream and from
    /// reconciliation polls.
    pub fn on_data(
        &self,
        handler: impl Fn(&TelemetryEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.listeners.add(handler)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Open the push channel. Only the first attempt's failure is returned;
    /// the client keeps retrying in the background until `disconnect()`.
    pub async fn connect(&self) -> Result<(), ClientError> {
        if let Some(every) = self.config.poll_interval
            && !self.is_polling()
        {
            self.start_polling(every);
        }
        let session = StreamSession {
            url: self.stream_url.clone(),
            shared: self.shared.clone(),
        };
        self.link.connect(session).await
    }

    /// Add topics. Pushes the full set immediately when connected.
    pub fn subscribe(&self, topics: &[Topic]) {
        let mut stream = lock(&self.shared.stream);
        let before = stream.topics.len();
        stream.topics.extend(topics.iter().copied());
        if stream.topics.len() == before {
            return;
        }
        if let Some(outbound) = &stream.outbound {
            let all: Vec<Topic> = stream.topics.iter().copied().collect();
            let _ = outbound.send(subscription_frame("subscribe", &all));
        }
    }

    /// Remove topics. Tells the server which ones were dropped when
    /// connected.
    pub fn unsubscribe(&self, topics: &[Topic]) {
        let mut stream = lock(&self.shared.stream);
        let removed: Vec<Topic> = topics
            .iter()
            .copied()
            .filter(|topic| stream.topics.remove(topic))
            .collect();
        if removed.is_empty() {
            return;
        }
        if let Some(outbound) = &stream.outbound {
            let _ = outbound.send(subscription_frame("unsubscribe", &removed));
        }
    }

    /// One timed pull of `topic`.
    pub async fn fetch(&self, topic: Topic) -> Result<TelemetryEvent, ClientError> {
        self.puller.event(topic).await
    }

    /// One timed pull, decoded as `T`'s topic.
    pub async fn fetch_records<T: TopicRecord>(&self) -> Result<Vec<T>, ClientError> {
        self.puller.records().await
    }

    pub async fn fetch_generators(&self) -> Result<Vec<Generator>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_power(&self) -> Result<Vec<PowerCircuit>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_factory(&self) -> Result<Vec<Machine>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_belts(&self) -> Result<Vec<Belt>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_trains(&self) -> Result<Vec<Train>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_drones(&self) -> Result<Vec<Drone>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_prod_stats(&self) -> Result<Vec<ProdStat>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_storage(&self) -> Result<Vec<StorageContainer>, ClientError> {
        self.fetch_records().await
    }

    pub async fn fetch_session_info(&self) -> Result<Vec<SessionInfo>, ClientError> {
        self.fetch_records().await
    }

    /// Pull every subscribed topic each `every` and emit the results to the
    /// listeners. Replaces a running poller.
    pub fn start_polling(&self, every: Duration) {
        if every.is_zero() {
            warn!("ignoring zero poll interval");
            return;
        }
        let puller = self.puller.clone();
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for topic in shared.topics() {
                    match puller.event(topic).await {
                        Ok(event) => shared.listeners.emit(&event),
                        Err(err) => debug!(%topic, error = %err, "reconciliation poll failed"),
                    }
                }
            }
        });
        if let Some(previous) = lock(&self.poller).replace(task) {
            previous.abort();
        }
    }

    pub fn stop_polling(&self) {
        if let Some(task) = lock(&self.poller).take() {
            task.abort();
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.poller)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop reconnecting and polling, close the socket, and forget
    /// subscriptions and listeners. Idempotent.
    pub fn disconnect(&self) {
        self.link.disconnect();
        self.stop_polling();
        {
            let mut stream = lock(&self.shared.stream);
            stream.topics.clear();
            stream.outbound = None;
        }
        self.shared.listeners.clear();
    }
}

impl Drop for TelemetryClient {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(message: Message) -> String {
        match message {
            Message::Text(text) => text.as_str().to_string(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn subscribe_frame_shape() {
        let frame = text(subscription_frame("subscribe", &[Topic::Power, Topic::Belts]));
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"action": "subscribe", "endpoints": ["getPower", "getBelts"]})
        );
    }

    #[test]
    fn dispatch_drops_bad_frames() {
        let shared = Shared::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        shared
            .listeners
            .add(move |event: &TelemetryEvent| lock(&sink).push(event.topic()));

        shared.dispatch(r#"[{"foo":1}]"#);
        shared.dispatch("garbage");
        shared.dispatch(r#"[{"CircuitGroupID":1,"PowerProduction":10,"PowerConsumed":5}]"#);
        shared.dispatch(r#"[{"ItemsPerMinute":40}]"#);

        assert_eq!(*lock(&seen), vec![Topic::Power, Topic::Belts]);
    }

    #[tokio::test]
    async fn subscriptions_have_set_semantics() {
        let client = TelemetryClient::new(TelemetryConfig::new("http://127.0.0.1:9")).unwrap();
        client.subscribe(&[Topic::Power, Topic::Belts]);
        client.subscribe(&[Topic::Power]);
        assert_eq!(client.subscriptions(), vec![Topic::Power, Topic::Belts]);

        client.unsubscribe(&[Topic::Belts, Topic::Belts, Topic::Trains]);
        assert_eq!(client.subscriptions(), vec![Topic::Power]);

        client.disconnect();
        assert!(client.subscriptions().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
