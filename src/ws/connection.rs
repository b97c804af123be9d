#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt as _, SinkExt as _, Stream, StreamExt as _};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::config::Config;
use super::dispatcher::{EventDispatcher, HandlerId, Subscription};
use super::error::WsError;
use super::event::{CloseInfo, Event, EventKind, NO_STATUS_RECEIVED, NORMAL_CLOSURE};
use super::keepalive::KeepaliveMonitor;
use super::message::{OutboundMessage, PING, parse_frame};
use super::queue::OutboundQueue;
use super::reconnect::{ReconnectPolicy, ReconnectState, ScheduledRetry};
use crate::Result;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingOpen = BoxFuture<'static, std::result::Result<WsStream, WsError>>;

const CLIENT_DISCONNECT_REASON: &str = "Client disconnect";
const KEEPALIVE_TIMEOUT_REASON: &str = "keepalive timeout";
const CONNECTION_LOST_REASON: &str = "connection lost";

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Not connected. Initial state, and the state between reconnection attempts
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport open; messages are sent immediately
    Connected,
    /// Client-initiated close in progress
    Closing,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

enum Command {
    Connect,
    Disconnect,
    Send(OutboundMessage),
    QueueLen(oneshot::Sender<usize>),
}

/// Keeps a WebSocket connection to the dashboard server alive.
///
/// The manager handles:
/// - Opening the transport on [`Self::connect`] and closing it on [`Self::disconnect`]
/// - Automatic reconnection with exponential backoff and a bounded attempt budget
/// - Liveness probing via `"ping"` / `pong` with a timeout
/// - Buffering messages sent while disconnected and flushing them, in order, on reconnect
/// - Announcing lifecycle and server events to subscribers
///
/// All of this runs on a single background task that exclusively owns the transport.
/// The manager itself is a cheap handle; clones share the same connection.
///
/// # Example
///
/// ```no_run
/// use dashboard_realtime::ws::config::Config;
/// use dashboard_realtime::ws::{ConnectionManager, EventKind};
///
/// # async fn example() -> dashboard_realtime::Result<()> {
/// let connection = ConnectionManager::new("ws://127.0.0.1:8000/ws", Config::default())?;
///
/// connection.on(EventKind::application("project_updated"), |event| {
///     println!("{event:?}");
/// });
/// connection.connect()?;
/// connection.send(r#"{"action": "refresh"}"#)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    /// Sender channel for commands handled by the connection task
    command_tx: mpsc::UnboundedSender<Command>,
    /// Watch channel receiver for state changes (for use in checking the current state)
    state_rx: watch::Receiver<ConnectionState>,
    /// Subscriber registry shared with the connection task
    dispatcher: Arc<EventDispatcher>,
}

impl ConnectionManager {
    /// Create a new connection manager and spawn its connection task.
    ///
    /// The endpoint must be a `ws://` or `wss://` URL. No connection is attempted until
    /// [`Self::connect`] is called. Must be called from within a tokio runtime.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let url = Url::parse(endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "unsupported WebSocket scheme `{}` in {endpoint}",
                url.scheme()
            )));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let dispatcher = Arc::new(EventDispatcher::new());

        let driver = Driver::new(
            url.into(),
            &config,
            command_rx,
            state_tx,
            Arc::clone(&dispatcher),
        );
        tokio::spawn(driver.run());

        Ok(Self {
            command_tx,
            state_rx,
            dispatcher,
        })
    }

    /// Open the connection. No-op while connecting or connected.
    ///
    /// Also restarts the reconnection cycle: the attempt counter is reset and any scheduled
    /// retry is replaced by an immediate attempt.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Close the connection with a normal closure and stop reconnecting.
    ///
    /// Cancels any scheduled retry and keepalive timers. Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Send a message, or queue it until the next successful connection.
    pub fn send<M: Into<OutboundMessage>>(&self, message: M) -> Result<()> {
        self.command(Command::Send(message.into()))
    }

    /// Serialize `request` to JSON and [`Self::send`] it.
    pub fn send_json<R: Serialize>(&self, request: &R) -> Result<()> {
        let value = serde_json::to_value(request)?;
        self.send(value)
    }

    /// Register a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.dispatcher.on(kind, handler)
    }

    /// Remove a handler registered with [`Self::on`].
    pub fn off(&self, kind: &EventKind, id: HandlerId) -> bool {
        self.dispatcher.off(kind, id)
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Receive every event, regardless of kind.
    ///
    /// Each call returns a new independent receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.dispatcher.subscribe()
    }

    /// Stream every event, regardless of kind.
    pub fn events(&self) -> impl Stream<Item = Result<Event>> + use<> {
        self.dispatcher.stream()
    }

    /// Number of messages waiting for the next connection.
    pub async fn queued(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::QueueLen(tx))?;
        rx.await.map_err(|_e| WsError::ConnectionClosed.into())
    }

    fn command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }
}

/// Owns the transport and every timer; runs until all handles are dropped.
struct Driver {
    endpoint: String,
    connect_timeout: Duration,
    close_timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    dispatcher: Arc<EventDispatcher>,
    queue: OutboundQueue,
    reconnect: ReconnectState,
    keepalive: KeepaliveMonitor,
    opening: Option<PendingOpen>,
    socket: Option<WsStream>,
    retry_at: Option<Instant>,
    close_deadline: Option<Instant>,
}

impl Driver {
    fn new(
        endpoint: String,
        config: &Config,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            endpoint,
            connect_timeout: config.connect_timeout,
            close_timeout: config.close_timeout,
            commands,
            state_tx,
            dispatcher,
            queue: OutboundQueue::new(),
            reconnect: ReconnectState::new(ReconnectPolicy::from(&config.reconnect)),
            keepalive: KeepaliveMonitor::new(config.heartbeat_interval, config.heartbeat_timeout),
            opening: None,
            socket: None,
            retry_at: None,
            close_deadline: None,
        }
    }

    async fn run(mut self) {
        loop {
            let retry_at = self.retry_at;
            let close_deadline = self.close_deadline;
            let probe_deadline = self.keepalive.deadline();

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    self.handle_command(command).await;
                }
                opened = poll_open(&mut self.opening) => {
                    self.opening = None;
                    self.on_open(opened).await;
                }
                frame = next_frame(&mut self.socket) => {
                    self.on_frame(frame).await;
                }
                () = self.keepalive.next_probe() => {
                    self.send_probe().await;
                }
                () = until(probe_deadline) => {
                    self.on_keepalive_timeout();
                }
                () = until(retry_at) => {
                    self.retry_at = None;
                    self.open();
                }
                () = until(close_deadline) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Close acknowledgment not received in time");
                    self.finish_close();
                }
            }
        }

        self.shutdown().await;
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        #[cfg(feature = "tracing")]
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "Connection state changed");
        }
        #[cfg(not(feature = "tracing"))]
        let _ = previous;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect_requested(),
            Command::Disconnect => self.disconnect_requested().await,
            Command::Send(message) => self.send(message).await,
            Command::QueueLen(reply) => {
                _ = reply.send(self.queue.len());
            }
        }
    }

    fn connect_requested(&mut self) {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                #[cfg(feature = "tracing")]
                tracing::debug!(state = %self.state(), "Already connecting or connected");
                return;
            }
            ConnectionState::Closing => self.finish_close(),
            ConnectionState::Disconnected => {}
        }

        self.retry_at = None;
        self.reconnect.reset();
        self.open();
    }

    async fn disconnect_requested(&mut self) {
        self.retry_at = None;
        self.opening = None;
        self.keepalive.stop();

        match self.state() {
            ConnectionState::Closing => {}
            ConnectionState::Connected => self.begin_close().await,
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                self.socket = None;
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    fn open(&mut self) {
        self.set_state(ConnectionState::Connecting);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            endpoint = %self.endpoint,
            attempt = self.reconnect.attempt(),
            "Opening WebSocket"
        );

        let endpoint = self.endpoint.clone();
        let connect_timeout = self.connect_timeout;
        self.opening = Some(
            async move {
                match timeout(connect_timeout, connect_async(endpoint)).await {
                    Ok(Ok((ws_stream, _))) => Ok(ws_stream),
                    Ok(Err(e)) => Err(WsError::Connection(e)),
                    Err(_elapsed) => Err(WsError::Timeout),
                }
            }
            .boxed(),
        );
    }

    async fn on_open(&mut self, opened: std::result::Result<WsStream, WsError>) {
        match opened {
            Ok(ws_stream) => {
                self.socket = Some(ws_stream);
                self.set_state(ConnectionState::Connected);
                self.reconnect.reset();

                #[cfg(feature = "tracing")]
                tracing::info!(endpoint = %self.endpoint, "WebSocket connected");
                self.dispatcher.emit(&Event::Connected);

                if let Err(info) = self.flush_queue().await {
                    self.on_close(info);
                    return;
                }
                self.keepalive.start();
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(endpoint = %self.endpoint, error = %e, "Unable to connect");
                let message = e.to_string();
                self.dispatcher.emit(&Event::Error {
                    message: message.clone(),
                });
                self.on_close(CloseInfo::abnormal(message));
            }
        }
    }

    async fn flush_queue(&mut self) -> std::result::Result<(), CloseInfo> {
        let Some(socket) = self.socket.as_mut() else {
            return Ok(());
        };

        match self.queue.flush(socket).await {
            Ok(sent) => {
                #[cfg(feature = "tracing")]
                if sent > 0 {
                    tracing::debug!(sent, "Flushed queued messages");
                }
                #[cfg(not(feature = "tracing"))]
                let _ = sent;
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    error = %e,
                    remaining = self.queue.len(),
                    "Flushing queued messages failed"
                );
                Err(CloseInfo::abnormal(e.to_string()))
            }
        }
    }

    async fn send(&mut self, message: OutboundMessage) {
        let socket = match self.socket.as_mut() {
            Some(socket) if self.state_tx.borrow().is_connected() => socket,
            _ => {
                self.queue.enqueue(message);
                #[cfg(feature = "tracing")]
                tracing::trace!(queued = self.queue.len(), "Not connected, queued message");
                return;
            }
        };

        if let Err(e) = socket.send(message.to_frame()).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Send failed, keeping message for the next connection");
            self.queue.enqueue(message);
            self.on_close(CloseInfo::abnormal(e.to_string()));
        }
    }

    async fn send_probe(&mut self) {
        if !self.state().is_connected() || self.keepalive.is_pending() {
            return;
        }
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        match socket.send(Message::Text(PING.into())).await {
            Ok(()) => {
                self.keepalive.probe_sent();
                #[cfg(feature = "tracing")]
                tracing::trace!("Sent keepalive probe");
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Unable to send keepalive probe");
                self.on_close(CloseInfo::abnormal(e.to_string()));
            }
        }
    }

    fn on_keepalive_timeout(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            "Keepalive timeout: no pong received within {:?}, closing connection",
            self.keepalive.timeout()
        );
        // Dropping the stream closes the socket without a close handshake.
        self.on_close(CloseInfo::abnormal(KEEPALIVE_TIMEOUT_REASON));
    }

    async fn on_frame(&mut self, frame: Option<std::result::Result<Message, tungstenite::Error>>) {
        if self.state() == ConnectionState::Closing {
            match frame {
                Some(Ok(Message::Close(_)) | Err(_)) | None => self.finish_close(),
                Some(Ok(_)) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Ignoring frame received while closing");
                }
            }
            return;
        }

        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(&text),
            Some(Ok(Message::Close(close_frame))) => {
                let info = close_frame.map_or_else(
                    || CloseInfo::new(NO_STATUS_RECEIVED, ""),
                    |f| CloseInfo::new(u16::from(f.code), f.reason.as_str()),
                );
                // Let tungstenite flush its reply to the peer's close frame.
                if let Some(mut socket) = self.socket.take() {
                    _ = timeout(self.close_timeout, socket.close(None)).await;
                }
                self.on_close(info);
            }
            Some(Ok(_)) => {
                // Binary frames are not part of the protocol; control frames are handled by
                // tungstenite.
            }
            Some(Err(e)) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "WebSocket error");
                let message = e.to_string();
                self.dispatcher.emit(&Event::Error {
                    message: message.clone(),
                });
                self.on_close(CloseInfo::abnormal(message));
            }
            None => self.on_close(CloseInfo::abnormal(CONNECTION_LOST_REASON)),
        }
    }

    fn on_text(&mut self, text: &str) {
        #[cfg(feature = "tracing")]
        tracing::trace!(%text, "Received WebSocket text message");

        match parse_frame(text) {
            Ok(frame) if frame.is_pong() => {
                if self.keepalive.acknowledge() {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Keepalive acknowledged");
                }
            }
            Ok(frame) => {
                self.dispatcher.emit(&Event::Application(frame.into()));
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Any close other than one requested through `disconnect`.
    fn on_close(&mut self, info: CloseInfo) {
        self.keepalive.stop();
        self.socket = None;
        self.set_state(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        if info.is_normal() {
            tracing::info!(code = info.code, reason = %info.reason, "WebSocket closed by server");
        } else {
            tracing::warn!(code = info.code, reason = %info.reason, "WebSocket closed abnormally");
        }

        let normal = info.is_normal();
        self.dispatcher.emit(&Event::Disconnected(info));
        if !normal {
            self.schedule_retry();
        }
    }

    fn schedule_retry(&mut self) {
        match self.reconnect.advance() {
            Some(ScheduledRetry { attempt, delay }) => {
                #[cfg(feature = "tracing")]
                tracing::info!(
                    attempt,
                    max_attempts = self.reconnect.policy().max_attempts,
                    ?delay,
                    "Reconnecting"
                );
                self.retry_at = Some(Instant::now() + delay);
                self.dispatcher
                    .emit(&Event::Reconnecting { attempt, delay });
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    max_attempts = self.reconnect.policy().max_attempts,
                    "Max reconnect attempts reached"
                );
                self.dispatcher.emit(&Event::MaxAttemptsReached);
            }
        }
    }

    async fn begin_close(&mut self) {
        self.set_state(ConnectionState::Closing);
        let Some(socket) = self.socket.as_mut() else {
            self.finish_close();
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::info!("Closing WebSocket");
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: CLIENT_DISCONNECT_REASON.into(),
        };
        match timeout(self.close_timeout, socket.close(Some(frame))).await {
            Ok(Ok(())) => {
                self.close_deadline = Some(Instant::now() + self.close_timeout);
            }
            _ => self.finish_close(),
        }
    }

    fn finish_close(&mut self) {
        self.socket = None;
        self.close_deadline = None;
        self.set_state(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::info!("WebSocket disconnected");
        self.dispatcher.emit(&Event::Disconnected(CloseInfo::new(
            NORMAL_CLOSURE,
            CLIENT_DISCONNECT_REASON,
        )));
    }

    async fn shutdown(mut self) {
        self.keepalive.stop();
        if let Some(mut socket) = self.socket.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: CLIENT_DISCONNECT_REASON.into(),
            };
            _ = timeout(self.close_timeout, socket.close(Some(frame))).await;
        }
        self.set_state(ConnectionState::Disconnected);

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection task stopped");
    }
}

async fn poll_open(opening: &mut Option<PendingOpen>) -> std::result::Result<WsStream, WsError> {
    match opening {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match socket {
        Some(ws_stream) => ws_stream.next().await,
        None => std::future::pending().await,
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
