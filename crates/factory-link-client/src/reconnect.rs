//! Reconnection with capped exponential backoff.
//!
//! The policy is a pure state machine ([`step`]) over [`Phase`]s. A
//! [`Reconnector`] owns one driver task that executes the machine's effects
//! for a [`Session`]: open the socket, serve it until it closes, sleep before
//! the next attempt. Only the first attempt reports its failure to the caller;
//! later failures are visible through [`Reconnector::state`] alone.

use crate::{ClientError, lock};
use factory_link_core::ConnectionState;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Retry timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    /// Retries scheduled before giving up for good.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn with_cap(mut self, cap: Duration) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// `min(base * 2^attempt, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Where the connection lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    /// A socket open is in flight; `attempt` retries have been used so far.
    Connecting { attempt: u32 },
    Connected,
    /// Waiting for the retry timer.
    Backoff { attempt: u32 },
    /// Gave up: retries exhausted or the server refused us.
    Stopped,
}

impl Phase {
    pub fn connection_state(&self) -> ConnectionState {
        match self {
            Phase::Idle => ConnectionState::Disconnected,
            Phase::Connecting { .. } | Phase::Backoff { .. } => ConnectionState::Connecting,
            Phase::Connected => ConnectionState::Connected,
            Phase::Stopped => ConnectionState::Error,
        }
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Connect,
    Opened,
    Failed,
    Closed,
    TimerElapsed,
    /// The server refused our credentials; retrying cannot help.
    Rejected,
    Disconnect,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    OpenSocket,
    ScheduleRetry(Duration),
    CancelTimer,
}

/// Pure transition function.
pub fn step(phase: Phase, signal: Signal, policy: &BackoffPolicy) -> (Phase, Effect) {
    match (phase, signal) {
        (_, Signal::Disconnect) => (Phase::Idle, Effect::CancelTimer),
        (Phase::Idle | Phase::Stopped, Signal::Connect) => {
            (Phase::Connecting { attempt: 0 }, Effect::OpenSocket)
        }
        (Phase::Connecting { .. }, Signal::Opened) => (Phase::Connected, Effect::None),
        (Phase::Connecting { attempt }, Signal::Failed | Signal::Closed) => retry(attempt, policy),
        (Phase::Connected, Signal::Closed) => retry(0, policy),
        (Phase::Backoff { attempt }, Signal::TimerElapsed) => {
            (Phase::Connecting { attempt }, Effect::OpenSocket)
        }
        (Phase::Connecting { .. } | Phase::Connected | Phase::Backoff { .. }, Signal::Rejected) => {
            (Phase::Stopped, Effect::None)
        }
        (unchanged, _) => (unchanged, Effect::None),
    }
}

fn retry(attempt: u32, policy: &BackoffPolicy) -> (Phase, Effect) {
    if attempt >= policy.max_attempts {
        (Phase::Stopped, Effect::None)
    } else {
        (
            Phase::Backoff {
                attempt: attempt + 1,
            },
            Effect::ScheduleRetry(policy.delay(attempt)),
        )
    }
}

/// One kind of push channel: how to open it and how to serve it.
pub trait Session: Send + 'static {
    type Link: Send + 'static;

    fn open(&mut self) -> impl Future<Output = Result<Self::Link, ClientError>> + Send;

    /// Serve `link` until it closes. Return [`ClientError::Auth`] when the
    /// server closed it for bad credentials.
    fn serve(&mut self, link: Self::Link) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Phase plus bookkeeping. `generation` moves on every fresh connect and
/// every disconnect; signals tagged with an older generation are dropped.
#[derive(Debug, Clone, Copy, Default)]
struct Track {
    phase: Phase,
    generation: u64,
    opened: u64,
}

struct Machine {
    name: &'static str,
    policy: BackoffPolicy,
    track: Mutex<Track>,
}

impl Machine {
    /// Apply `Connect`. Returns the new attempt's generation when a socket
    /// must be opened.
    fn start(&self) -> Option<u64> {
        let mut track = lock(&self.track);
        let (next, effect) = step(track.phase, Signal::Connect, &self.policy);
        track.phase = next;
        if effect != Effect::OpenSocket {
            return None;
        }
        track.generation += 1;
        debug!(channel = self.name, generation = track.generation, "connect");
        Some(track.generation)
    }

    fn stop(&self) {
        let mut track = lock(&self.track);
        track.phase = step(track.phase, Signal::Disconnect, &self.policy).0;
        track.generation += 1;
    }

    /// `None` when `generation` is no longer current.
    fn apply(&self, generation: u64, signal: Signal) -> Option<(Phase, Effect)> {
        let mut track = lock(&self.track);
        if track.generation != generation {
            debug!(channel = self.name, ?signal, "ignoring signal from a stale attempt");
            return None;
        }
        let (next, effect) = step(track.phase, signal, &self.policy);
        if next != track.phase {
            debug!(channel = self.name, from = ?track.phase, to = ?next, ?signal, "phase change");
            if next == Phase::Connected {
                track.opened += 1;
            }
        }
        track.phase = next;
        Some((next, effect))
    }

    fn phase(&self) -> Phase {
        lock(&self.track).phase
    }

    fn opened(&self) -> u64 {
        lock(&self.track).opened
    }
}

/// Keeps one push channel alive.
pub struct Reconnector {
    machine: Arc<Machine>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reconnector {
    /// `name` labels log lines.
    pub fn new(name: &'static str, policy: BackoffPolicy) -> Self {
        Self {
            machine: Arc::new(Machine {
                name,
                policy,
                track: Mutex::new(Track::default()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    pub fn state(&self) -> ConnectionState {
        self.phase().connection_state()
    }

    /// Links opened so far, reconnects included.
    pub fn connections(&self) -> u64 {
        self.machine.opened()
    }

    /// Whether a driver task is still running.
    pub fn is_active(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Open `session` and keep it open. The first attempt's failure is
    /// returned; retries continue in the background regardless. A call while
    /// already connecting or connected is a no-op. If [`Reconnector::disconnect`]
    /// runs while the first open is in flight, the result is
    /// [`ClientError::Cancelled`].
    pub async fn connect<S: Session>(&self, mut session: S) -> Result<(), ClientError> {
        let Some(generation) = self.machine.start() else {
            return Ok(());
        };

        match session.open().await {
            Ok(link) => match self.machine.apply(generation, Signal::Opened) {
                Some((Phase::Connected, _)) => {
                    info!(channel = self.machine.name, "connected");
                    self.spawn(drive(
                        session,
                        self.machine.clone(),
                        generation,
                        Effect::None,
                        Some(link),
                    ));
                    Ok(())
                }
                _ => Err(ClientError::Cancelled),
            },
            Err(err) => {
                let Some((_, effect)) = self.machine.apply(generation, failure(&err)) else {
                    return Err(ClientError::Cancelled);
                };
                self.spawn(drive(session, self.machine.clone(), generation, effect, None));
                Err(err)
            }
        }
    }

    /// Stop retrying and drop the channel. Safe to call in any phase, any
    /// number of times.
    pub fn disconnect(&self) {
        self.machine.stop();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
            info!(channel = self.machine.name, "disconnected");
        }
    }

    fn spawn(&self, driver: impl Future<Output = ()> + Send + 'static) {
        let previous = lock(&self.task).replace(tokio::spawn(driver));
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

fn failure(err: &ClientError) -> Signal {
    if err.is_auth() {
        Signal::Rejected
    } else {
        Signal::Failed
    }
}

async fn drive<S: Session>(
    mut session: S,
    machine: Arc<Machine>,
    generation: u64,
    mut effect: Effect,
    mut link: Option<S::Link>,
) {
    loop {
        if let Some(open) = link.take() {
            let signal = match session.serve(open).await {
                Ok(()) => Signal::Closed,
                Err(ClientError::Auth) => Signal::Rejected,
                Err(err) => {
                    debug!(channel = machine.name, error = %err, "link dropped");
                    Signal::Closed
                }
            };
            let Some((_, next)) = machine.apply(generation, signal) else {
                return;
            };
            effect = next;
        }

        match effect {
            Effect::ScheduleRetry(delay) => {
                debug!(channel = machine.name, ?delay, "retrying after delay");
                tokio::time::sleep(delay).await;
                let Some((_, next)) = machine.apply(generation, Signal::TimerElapsed) else {
                    return;
                };
                effect = next;
            }
            Effect::OpenSocket => match session.open().await {
                Ok(open) => {
                    let Some((phase, next)) = machine.apply(generation, Signal::Opened) else {
                        return;
                    };
                    effect = next;
                    if phase == Phase::Connected {
                        info!(channel = machine.name, "reconnected");
                        link = Some(open);
                    }
                }
                Err(err) => {
                    debug!(channel = machine.name, error = %err, "reconnect attempt failed");
                    let Some((_, next)) = machine.apply(generation, failure(&err)) else {
                        return;
                    };
                    effect = next;
                }
            },
            Effect::None | Effect::CancelTimer => {
                if link.is_none() {
                    if machine.phase() == Phase::Stopped {
                        info!(channel = machine.name, "giving up on reconnection");
                    }
                    return;
                }
            }
        }
    }
}
