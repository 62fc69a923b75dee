//! Persistent relay connection for one user session.
//!
//! The [`ConnectionManager`] owns the WebSocket to the relay, drives the
//! reconnect state machine, and is the only component that mutates
//! [`ConnectionState`]. Everyone else observes transitions through status
//! subscriptions. Decoded inbound frames are handed to the dispatcher via
//! the channel returned at construction; outbound frames fail fast when
//! the socket is not in the `Connected` state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use chatat_proto::codec::{self, CodecError};
use chatat_proto::frame::{InboundFrame, OutboundFrame};
use chatat_proto::id::UserId;

use crate::config::SyncConfig;

/// Connection lifecycle state, owned solely by the [`ConnectionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The socket is open and frames flow.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Linear backoff policy: attempt `n` (1-based) waits `base_delay * n`.
///
/// Self-contained so a capped-exponential-with-jitter policy can be
/// swapped in behind the same state machine contract.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay multiplier for the first attempt.
    pub base_delay: Duration,
    /// Attempt ceiling; beyond it the manager goes terminally Disconnected.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// The backoff delay before the given attempt, `None` once the
    /// ceiling is exceeded.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempt))
    }
}

/// Error returned when `connect` is given an unusable endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The relay endpoint plus user id does not form a valid URL.
    #[error("invalid relay endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        /// The offending URL string.
        endpoint: String,
        /// Underlying parse error.
        source: url::ParseError,
    },
}

/// Error returned by a send attempted at the wrong time.
///
/// Sends never queue or block; the caller degrades the UI instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The connection is not in the `Connected` state.
    #[error("connection is not established")]
    NotConnected,
    /// The outbound channel is full.
    #[error("outbound channel is full")]
    Backpressure,
}

/// Identifies one status subscriber for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A live status subscription; receives every state transition.
#[derive(Debug)]
pub struct StatusSubscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<ConnectionState>,
}

impl StatusSubscription {
    /// The id to pass to [`ConnectionManager::unsubscribe`].
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next state transition.
    pub async fn recv(&mut self) -> Option<ConnectionState> {
        self.rx.recv().await
    }

    /// Returns an already-delivered transition without waiting.
    pub fn try_recv(&mut self) -> Option<ConnectionState> {
        self.rx.try_recv().ok()
    }
}

/// How a socket session ended, as seen by the read/write loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closure {
    /// Normal close (explicit disconnect or server normal close code).
    Graceful,
    /// Abnormal termination; candidate for reconnect.
    Abnormal,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Owns the relay socket and the reconnect state machine.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    endpoint: String,
    policy: ReconnectPolicy,
    channel_capacity: usize,
    state: Mutex<ConnectionState>,
    user: Mutex<Option<UserId>>,
    subscribers: Mutex<Vec<(SubscriberId, mpsc::UnboundedSender<ConnectionState>)>>,
    next_subscriber: AtomicU64,
    /// Set by an explicit disconnect; checked before any scheduled
    /// reconnect fires so a stale timer never resurrects the connection.
    terminal: AtomicBool,
    /// Bumped on every connect/disconnect; a driver task from an older
    /// generation exits at its next checkpoint.
    generation: AtomicU64,
    outbound: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    inbound: mpsc::Sender<InboundFrame>,
    shutdown: Notify,
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Applies a state transition for the given driver generation.
    ///
    /// Stale generations are ignored, as are transitions to the current
    /// state. Subscribers whose receiver was dropped are pruned.
    fn transition(&self, generation: u64, next: ConnectionState) {
        let mut state = self.state.lock();
        if !self.is_current(generation) || *state == next {
            return;
        }
        tracing::debug!(from = %*state, to = %next, "connection state change");
        *state = next;
        drop(state);
        self.subscribers
            .lock()
            .retain(|(_, tx)| tx.send(next).is_ok());
    }
}

impl ConnectionManager {
    /// Creates a manager along with the channel that will carry decoded
    /// inbound frames to the dispatcher.
    #[must_use]
    pub fn new(config: &SyncConfig) -> (Self, mpsc::Receiver<InboundFrame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity);
        let manager = Self {
            inner: Arc::new(Inner {
                endpoint: config.endpoint.clone(),
                policy: ReconnectPolicy {
                    base_delay: config.base_delay,
                    max_attempts: config.max_attempts,
                },
                channel_capacity: config.channel_capacity,
                state: Mutex::new(ConnectionState::Disconnected),
                user: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
                terminal: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                outbound: Mutex::new(None),
                inbound: inbound_tx,
                shutdown: Notify::new(),
            }),
        };
        (manager, inbound_rx)
    }

    /// Establishes the relay connection for `user`.
    ///
    /// Idempotent while already Connected for the same user. Otherwise
    /// resets the attempt counter and the terminal flag and starts a fresh
    /// driver task; any previous driver is invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidEndpoint`] if the endpoint plus user
    /// id is not a valid URL. Transport failures after this point surface
    /// as status notifications, never as errors from `connect`.
    pub fn connect(&self, user: UserId) -> Result<(), ConnectError> {
        let url = format!("{}/{}", self.inner.endpoint.trim_end_matches('/'), user);
        url::Url::parse(&url).map_err(|source| ConnectError::InvalidEndpoint {
            endpoint: url.clone(),
            source,
        })?;

        {
            let current_user = self.inner.user.lock();
            if *current_user == Some(user) && self.status() == ConnectionState::Connected {
                tracing::debug!(user = %user, "already connected");
                return Ok(());
            }
        }

        *self.inner.user.lock() = Some(user);
        self.inner.terminal.store(false, Ordering::SeqCst);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            drive(inner, user, url, generation).await;
        });
        Ok(())
    }

    /// Gracefully closes the connection. Terminal for this session: the
    /// pending reconnect timer (if any) is cancelled and no reconnect
    /// fires until a new explicit `connect`.
    pub fn disconnect(&self) {
        self.inner.terminal.store(true, Ordering::SeqCst);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.shutdown.notify_waiters();
        self.inner.transition(generation, ConnectionState::Disconnected);
        *self.inner.outbound.lock() = None;
    }

    /// Current connection state.
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Registers an independent status subscriber.
    #[must_use]
    pub fn subscribe(&self) -> StatusSubscription {
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push((id, tx));
        StatusSubscription { id, rx }
    }

    /// Removes a status subscriber.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.subscribers.lock().retain(|(sid, _)| *sid != id);
    }

    /// Hands a frame to the socket writer.
    ///
    /// # Errors
    ///
    /// Fails fast with [`SendError::NotConnected`] while not Connected and
    /// [`SendError::Backpressure`] when the writer cannot keep up; frames
    /// are never queued across connection states.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        if self.status() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let outbound = self.inner.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(SendError::NotConnected);
        };
        tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::NotConnected,
        })
    }
}

/// One user session: a [`ConnectionManager`] bound to a logged-in user.
///
/// Created on login, disconnected on logout or drop. Replaces the
/// process-wide singleton connection of older clients with an explicitly
/// owned object passed to the components that need it.
pub struct Session {
    user: UserId,
    manager: Arc<ConnectionManager>,
}

impl Session {
    /// Creates a session and the inbound frame channel for its dispatcher.
    #[must_use]
    pub fn new(user: UserId, config: &SyncConfig) -> (Self, mpsc::Receiver<InboundFrame>) {
        let (manager, inbound_rx) = ConnectionManager::new(config);
        (
            Self {
                user,
                manager: Arc::new(manager),
            },
            inbound_rx,
        )
    }

    /// The logged-in user this session belongs to.
    #[must_use]
    pub const fn user(&self) -> UserId {
        self.user
    }

    /// The connection manager owned by this session.
    #[must_use]
    pub const fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Connects the session's user to the relay.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::connect`].
    pub fn connect(&self) -> Result<(), ConnectError> {
        self.manager.connect(self.user)
    }

    /// Gracefully closes the session's connection.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.manager.disconnect();
    }
}

/// Driver task: connects, pumps the socket, and applies the reconnect
/// policy until the session ends or the generation is superseded.
async fn drive(inner: Arc<Inner>, user: UserId, url: String, generation: u64) {
    let mut attempt: u32 = 0;
    loop {
        if !inner.is_current(generation) {
            return;
        }
        inner.transition(generation, ConnectionState::Connecting);
        match connect_async(&url).await {
            Ok((ws, _response)) => {
                if !inner.is_current(generation) {
                    return;
                }
                attempt = 0;
                let (out_tx, out_rx) = mpsc::channel(inner.channel_capacity);
                *inner.outbound.lock() = Some(out_tx);
                inner.transition(generation, ConnectionState::Connected);
                tracing::info!(user = %user, url = %url, "connected to relay");

                let closure = run_socket(ws, out_rx, &inner).await;
                *inner.outbound.lock() = None;
                if !inner.is_current(generation) {
                    return;
                }
                if inner.terminal.load(Ordering::SeqCst) || closure == Closure::Graceful {
                    inner.transition(generation, ConnectionState::Disconnected);
                    return;
                }
                tracing::warn!(user = %user, "connection lost");
            }
            Err(e) => {
                tracing::warn!(user = %user, err = %e, "relay connect failed");
            }
        }

        attempt += 1;
        let Some(delay) = inner.policy.delay_for(attempt) else {
            tracing::warn!(
                user = %user,
                attempts = attempt - 1,
                "reconnect attempts exhausted"
            );
            inner.transition(generation, ConnectionState::Disconnected);
            return;
        };
        inner.transition(generation, ConnectionState::Reconnecting);
        tracing::info!(
            user = %user,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = inner.shutdown.notified() => {
                inner.transition(generation, ConnectionState::Disconnected);
                return;
            }
        }
    }
}

/// Pumps one open socket: writes outbound frames, decodes inbound text
/// frames, and classifies how the session ended.
///
/// Malformed frames are logged and skipped; the loop never dies on bad
/// data. Unknown frame types are dropped before they reach the dispatcher.
async fn run_socket(
    ws: WsStream,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
    inner: &Inner,
) -> Closure {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            () = inner.shutdown.notified() => {
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                };
                let _ = sink.send(Message::Close(Some(close))).await;
                return Closure::Graceful;
            }
            frame = out_rx.recv() => match frame {
                Some(frame) => match codec::encode(&frame) {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text.into())).await {
                            tracing::warn!(err = %e, "socket write failed");
                            return Closure::Abnormal;
                        }
                    }
                    Err(e) => tracing::warn!(err = %e, "dropping unencodable frame"),
                },
                // Manager released the sender; session is over.
                None => return Closure::Graceful,
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => match codec::decode(text.as_str()) {
                    Ok(frame) => {
                        if inner.inbound.send(frame).await.is_err() {
                            // Dispatcher dropped; nothing left to feed.
                            return Closure::Graceful;
                        }
                    }
                    Err(CodecError::UnknownType { frame_type }) => {
                        tracing::debug!(frame_type = %frame_type, "unknown frame type, dropping");
                    }
                    Err(e) => {
                        tracing::warn!(err = %e, "malformed frame, skipping");
                    }
                },
                Some(Ok(Message::Close(close))) => {
                    let graceful = close
                        .as_ref()
                        .is_none_or(|frame| frame.code == CloseCode::Normal);
                    tracing::info!(graceful, "relay closed the connection");
                    return if graceful { Closure::Graceful } else { Closure::Abnormal };
                }
                Some(Ok(_)) => {
                    // Ping/pong/binary frames carry nothing for this protocol.
                }
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "socket read error");
                    return Closure::Abnormal;
                }
                None => return Closure::Abnormal,
            }
        }
    }
}
