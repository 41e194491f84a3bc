//! Per-relay WebSocket connection.
//!
//! Each relay gets one [`RelayConnection`] driving a state machine:
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──handshake+pong──▶ Connected
//!                                  │                            │
//!                                  └──timeout/err──▶ Failed ◀───┤ recv/send error
//! Connected ──disconnect()──▶ Disconnecting ──▶ Disconnected
//! Failed ──backoff elapsed──▶ Connecting (when auto_reconnect)
//! ```
//!
//! A connected socket is split into a writer task (fed by an mpsc channel,
//! acking each socket write) and a reader task (parsing frames, completing
//! publish waiters, and broadcasting to [`MessageStream`] consumers).
//! State mutations funnel through a single connect gate plus the owning
//! tasks, so concurrent public calls serialize deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::nostr::{Event, Filter};

use super::config::RelayConfig;
use super::message::{ClientMessage, RelayMessage};

/// Connection lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayConnectionState {
    /// No socket and no pending work.
    Disconnected,

    /// Handshake and liveness probe in progress.
    Connecting,

    /// Socket is live; reader and writer tasks are running.
    Connected,

    /// User-initiated teardown in progress.
    Disconnecting,

    /// The connection was lost or could not be established.
    Failed(String),
}

impl RelayConnectionState {
    /// Returns whether the connection is usable for sends.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

const MESSAGE_CHANNEL_CAPACITY: usize = 256;
const STATE_CHANNEL_CAPACITY: usize = 32;
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;
const PING_PAYLOAD: &[u8] = b"petrel";

/// One queued outgoing frame; `ack` reports the socket write result.
struct Outbound {
    frame: WsMessage,
    ack: Option<oneshot::Sender<std::result::Result<(), String>>>,
}

struct OkOutcome {
    accepted: bool,
    message: String,
}

struct ReconnectState {
    attempts: u32,
    delay: std::time::Duration,
    pending: Option<JoinHandle<()>>,
}

/// A connection to a single relay.
///
/// Cheap to clone; all clones share the same underlying connection.
#[derive(Clone)]
pub struct RelayConnection {
    url: String,
    config: RelayConfig,
    state: Arc<RwLock<RelayConnectionState>>,
    state_tx: broadcast::Sender<RelayConnectionState>,
    message_tx: broadcast::Sender<RelayMessage>,
    outbound: Arc<RwLock<Option<mpsc::Sender<Outbound>>>>,
    ok_waiters: Arc<Mutex<HashMap<String, oneshot::Sender<OkOutcome>>>>,
    subscription_ids: Arc<RwLock<HashSet<String>>>,
    reconnect: Arc<Mutex<ReconnectState>>,
    /// Serializes connect/disconnect so state transitions cannot interleave.
    connect_gate: Arc<Mutex<()>>,
    /// Incremented per IO session; stale reader tasks check it before
    /// touching shared state.
    generation: Arc<RwLock<u64>>,
}

impl RelayConnection {
    /// Creates a connection for `url` without opening it.
    ///
    /// URLs use `ws://` or `wss://`.
    #[must_use]
    pub fn new(url: impl Into<String>, config: RelayConfig) -> Self {
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let (message_tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        let initial_delay = config.initial_reconnect_delay;

        Self {
            url: url.into(),
            config,
            state: Arc::new(RwLock::new(RelayConnectionState::Disconnected)),
            state_tx,
            message_tx,
            outbound: Arc::new(RwLock::new(None)),
            ok_waiters: Arc::new(Mutex::new(HashMap::new())),
            subscription_ids: Arc::new(RwLock::new(HashSet::new())),
            reconnect: Arc::new(Mutex::new(ReconnectState {
                attempts: 0,
                delay: initial_delay,
                pending: None,
            })),
            connect_gate: Arc::new(Mutex::new(())),
            generation: Arc::new(RwLock::new(0)),
        }
    }

    /// Returns the relay URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> RelayConnectionState {
        self.state.read().await.clone()
    }

    /// Opens the WebSocket and confirms liveness with a ping/pong
    /// exchange, all within `connection_timeout`.
    ///
    /// A no-op when already connected or connecting; legal from any other
    /// state, including every `Failed` variant. Success resets the
    /// reconnect backoff.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`]; the connection moves to
    /// `Failed` and, with `auto_reconnect`, schedules a retry.
    pub async fn connect(&self) -> Result<()> {
        let _gate = self.connect_gate.lock().await;
        {
            let state = self.state.read().await;
            if matches!(
                *state,
                RelayConnectionState::Connected | RelayConnectionState::Connecting
            ) {
                return Ok(());
            }
        }

        self.set_state(RelayConnectionState::Connecting).await;
        debug!(url = %self.url, "connecting to relay");

        match timeout(self.config.connection_timeout, self.open_socket()).await {
            Ok(Ok(socket)) => {
                self.start_io(socket).await;
                self.reset_backoff().await;
                self.set_state(RelayConnectionState::Connected).await;
                info!(url = %self.url, "connected to relay");
                Ok(())
            }
            Ok(Err(e)) => {
                let reason = e.to_string();
                self.fail(reason.clone()).await;
                Err(Error::ConnectionFailed(reason))
            }
            Err(_) => {
                let reason = "connection timed out".to_string();
                self.fail(reason.clone()).await;
                Err(Error::ConnectionFailed(reason))
            }
        }
    }

    /// Cancels any pending reconnect, closes the socket, and wakes all
    /// publish waiters with `NotConnected`.
    pub async fn disconnect(&self) {
        {
            let mut reconnect = self.reconnect.lock().await;
            if let Some(pending) = reconnect.pending.take() {
                pending.abort();
            }
            reconnect.attempts = 0;
            reconnect.delay = self.config.initial_reconnect_delay;
        }

        let _gate = self.connect_gate.lock().await;
        if *self.state.read().await == RelayConnectionState::Disconnected {
            return;
        }

        self.set_state(RelayConnectionState::Disconnecting).await;
        *self.generation.write().await += 1;

        if let Some(tx) = self.outbound.write().await.take() {
            let _ = tx
                .send(Outbound {
                    frame: WsMessage::Close(None),
                    ack: None,
                })
                .await;
        }

        self.wake_waiters().await;
        self.set_state(RelayConnectionState::Disconnected).await;
        info!(url = %self.url, "disconnected from relay");
    }

    /// Serializes and sends a client frame, connecting first if needed.
    ///
    /// The call completes when the writer task has written the frame to
    /// the socket, bounded by `operation_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailed`] if the implicit connect fails,
    /// or [`Error::NotConnected`] on a send error or timeout; either way
    /// the connection moves to `Failed` and a reconnect is scheduled.
    pub async fn send(&self, message: &ClientMessage) -> Result<()> {
        if !self.state.read().await.is_connected() {
            self.connect().await?;
        }

        let json = message.to_json()?;
        let Some(tx) = self.outbound.read().await.clone() else {
            return Err(Error::NotConnected);
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        let outcome = timeout(self.config.operation_timeout, async move {
            tx.send(Outbound {
                frame: WsMessage::Text(json),
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| Error::NotConnected)?;
            match ack_rx.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) | Err(_) => Err(Error::NotConnected),
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.fail("send failed".to_string()).await;
                Err(e)
            }
            Err(_) => {
                self.fail("send timed out".to_string()).await;
                Err(Error::NotConnected)
            }
        }
    }

    /// Publishes an event and waits for the relay's `OK` acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RelayError`] when the relay rejects the event,
    /// [`Error::Timeout`] when no `OK` arrives within
    /// `operation_timeout`, and [`Error::NotConnected`] when the
    /// connection drops while waiting.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.ok_waiters
            .lock()
            .await
            .insert(event.id.clone(), waiter_tx);

        if let Err(e) = self.send(&ClientMessage::Event(event.clone())).await {
            self.ok_waiters.lock().await.remove(&event.id);
            return Err(e);
        }

        match timeout(self.config.operation_timeout, waiter_rx).await {
            Ok(Ok(outcome)) => {
                if outcome.accepted {
                    debug!(url = %self.url, event_id = %event.id, "event accepted");
                    Ok(())
                } else {
                    Err(Error::RelayError(outcome.message))
                }
            }
            // The waiter was dropped by a disconnect or connection loss
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => {
                self.ok_waiters.lock().await.remove(&event.id);
                Err(Error::Timeout)
            }
        }
    }

    /// Sends a `REQ` frame and tracks the subscription id.
    ///
    /// # Errors
    ///
    /// Propagates [`RelayConnection::send`] errors.
    pub async fn subscribe(&self, subscription_id: &str, filters: &[Filter]) -> Result<()> {
        self.send(&ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filters: filters.to_vec(),
        })
        .await?;
        self.subscription_ids
            .write()
            .await
            .insert(subscription_id.to_string());
        Ok(())
    }

    /// Sends a `CLOSE` frame and forgets the subscription id.
    ///
    /// # Errors
    ///
    /// Propagates [`RelayConnection::send`] errors.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.subscription_ids.write().await.remove(subscription_id);
        self.send(&ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await
    }

    /// Returns the ids of subscriptions opened on this connection.
    pub async fn subscription_ids(&self) -> HashSet<String> {
        self.subscription_ids.read().await.clone()
    }

    /// Returns a stream of inbound relay frames.
    ///
    /// Every consumer gets an independent cursor over the same frames, in
    /// socket order. Dropping a consumer does not affect the socket or
    /// other consumers. Streams stay valid across reconnects.
    #[must_use]
    pub fn messages(&self) -> MessageStream {
        MessageStream {
            rx: self.message_tx.subscribe(),
        }
    }

    /// Returns a stream of state transitions, starting with the current
    /// state.
    pub async fn state_changes(&self) -> StateStream {
        let rx = self.state_tx.subscribe();
        let current = self.state.read().await.clone();
        StateStream {
            current: Some(current),
            rx,
        }
    }

    async fn set_state(&self, next: RelayConnectionState) {
        {
            let mut state = self.state.write().await;
            if *state == next {
                return;
            }
            debug!(url = %self.url, from = ?*state, to = ?next, "relay state change");
            *state = next.clone();
        }
        let _ = self.state_tx.send(next);
    }

    /// Moves to `Failed`, wakes publish waiters, and schedules a
    /// reconnect.
    async fn fail(&self, reason: String) {
        warn!(url = %self.url, %reason, "relay connection failed");
        self.outbound.write().await.take();
        self.set_state(RelayConnectionState::Failed(reason)).await;
        self.wake_waiters().await;
        self.schedule_reconnect().await;
    }

    async fn wake_waiters(&self) {
        // Dropping the senders resolves every waiter with NotConnected
        self.ok_waiters.lock().await.clear();
    }

    async fn reset_backoff(&self) {
        let mut reconnect = self.reconnect.lock().await;
        reconnect.attempts = 0;
        reconnect.delay = self.config.initial_reconnect_delay;
    }

    fn schedule_reconnect(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if !self.config.auto_reconnect {
                return;
            }

            let mut reconnect = self.reconnect.lock().await;
            if reconnect.pending.is_some() {
                return;
            }

            reconnect.attempts += 1;
            if self.config.max_reconnect_attempts > 0
                && reconnect.attempts > self.config.max_reconnect_attempts
            {
                warn!(url = %self.url, attempts = reconnect.attempts - 1, "giving up on reconnect");
                return;
            }

            let delay = reconnect.delay;
            let bumped = reconnect
                .delay
                .mul_f64(self.config.reconnect_backoff_multiplier);
            reconnect.delay = bumped.min(self.config.max_reconnect_delay);

            debug!(url = %self.url, ?delay, attempt = reconnect.attempts, "scheduling reconnect");
            let connection = self.clone();
            let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    connection.reconnect.lock().await.pending = None;

                    // Only retry from Failed; a disconnect or a racing connect
                    // cancels the attempt
                    if !matches!(
                        *connection.state.read().await,
                        RelayConnectionState::Failed(_)
                    ) {
                        return;
                    }
                    if let Err(e) = connection.connect().await {
                        debug!(url = %connection.url, error = %e, "reconnect attempt failed");
                    }
                });
            reconnect.pending = Some(tokio::spawn(fut));
        })
    }

    /// Opens the socket and completes the ping/pong liveness probe.
    async fn open_socket(&self) -> Result<WsStream> {
        let (mut socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        socket
            .send(WsMessage::Ping(PING_PAYLOAD.to_vec()))
            .await
            .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

        loop {
            match socket.next().await {
                Some(Ok(WsMessage::Pong(_))) => return Ok(socket),
                Some(Ok(WsMessage::Ping(payload))) => {
                    socket
                        .send(WsMessage::Pong(payload))
                        .await
                        .map_err(|e| Error::ConnectionFailed(e.to_string()))?;
                }
                // Relays may greet with NOTICE or AUTH before our probe
                // completes; surface them rather than dropping them
                Some(Ok(WsMessage::Text(text))) => self.dispatch_text(&text).await,
                Some(Ok(WsMessage::Binary(_))) => {}
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::ConnectionFailed(e.to_string())),
                None => {
                    return Err(Error::ConnectionFailed(
                        "socket closed during liveness check".to_string(),
                    ))
                }
            }
        }
    }

    /// Splits the socket and spawns the writer and reader tasks.
    async fn start_io(&self, socket: WsStream) {
        let (writer, reader) = socket.split();
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        *self.outbound.write().await = Some(tx.clone());

        let session = {
            let mut generation = self.generation.write().await;
            *generation += 1;
            *generation
        };

        tokio::spawn(writer_loop(writer, rx));
        let connection = self.clone();
        let fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            Box::pin(async move { connection.reader_loop(reader, tx, session).await });
        tokio::spawn(fut);
    }

    async fn reader_loop(self, mut reader: WsReader, outbound: mpsc::Sender<Outbound>, session: u64) {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => self.dispatch_text(&text).await,
                Ok(WsMessage::Ping(payload)) => {
                    let _ = outbound
                        .send(Outbound {
                            frame: WsMessage::Pong(payload),
                            ack: None,
                        })
                        .await;
                }
                // Nostr is text-only
                Ok(WsMessage::Binary(_)) => {}
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(url = %self.url, error = %e, "relay socket error");
                    break;
                }
            }
        }

        // A newer session or an explicit disconnect owns the state now
        if *self.generation.read().await != session {
            return;
        }
        if matches!(
            *self.state.read().await,
            RelayConnectionState::Disconnecting | RelayConnectionState::Disconnected
        ) {
            return;
        }
        self.fail("connection closed by relay".to_string()).await;
    }

    async fn dispatch_text(&self, text: &str) {
        match RelayMessage::from_json(text) {
            Ok(message) => {
                if let RelayMessage::Ok {
                    event_id,
                    accepted,
                    message: ok_message,
                } = &message
                {
                    if let Some(waiter) = self.ok_waiters.lock().await.remove(event_id) {
                        let _ = waiter.send(OkOutcome {
                            accepted: *accepted,
                            message: ok_message.clone(),
                        });
                    }
                }
                let _ = self.message_tx.send(message);
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "ignoring malformed relay frame");
            }
        }
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

async fn writer_loop(mut writer: WsWriter, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(outbound) = rx.recv().await {
        let result = writer
            .send(outbound.frame)
            .await
            .map_err(|e| e.to_string());
        let failed = result.is_err();
        if let Some(ack) = outbound.ack {
            let _ = ack.send(result);
        }
        if failed {
            break;
        }
    }
    // Dropping the writer closes the socket; the reader notices and
    // drives the failure path
}

/// Independent cursor over a connection's inbound frames.
pub struct MessageStream {
    rx: broadcast::Receiver<RelayMessage>,
}

impl MessageStream {
    /// Receives the next frame, or `None` once the connection is gone.
    ///
    /// A slow consumer that misses frames skips them and keeps going.
    pub async fn recv(&mut self) -> Option<RelayMessage> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "message stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Independent cursor over a connection's state transitions.
///
/// Yields the state at subscription time first, then every change.
pub struct StateStream {
    current: Option<RelayConnectionState>,
    rx: broadcast::Receiver<RelayConnectionState>,
}

impl StateStream {
    /// Receives the next state, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<RelayConnectionState> {
        if let Some(current) = self.current.take() {
            return Some(current);
        }
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
