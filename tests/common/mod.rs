#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use dashboard_realtime::ws::Event;
use dashboard_realtime::ws::config::{Config, ReconnectConfig};
use futures_util::{SinkExt as _, StreamExt as _};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const PONG_FRAME: &str = r#"{"event": "pong", "data": {}}"#;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
enum ServerCommand {
    Text(String),
    Close(u16),
}

/// Mock dashboard WebSocket server.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Commands delivered to ALL connected clients
    control_tx: broadcast::Sender<ServerCommand>,
    /// Text frames received from clients, in arrival order
    received_rx: mpsc::UnboundedReceiver<String>,
    /// When false, TCP connections are dropped before the WebSocket handshake
    accepting: Arc<AtomicBool>,
    /// When true, every `"ping"` is answered with a `pong` frame
    answer_pings: Arc<AtomicBool>,
    /// Completed WebSocket handshakes
    handshakes: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (control_tx, _) = broadcast::channel::<ServerCommand>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let accepting = Arc::new(AtomicBool::new(true));
        let answer_pings = Arc::new(AtomicBool::new(true));
        let handshakes = Arc::new(AtomicUsize::new(0));

        let server_control = control_tx.clone();
        let server_accepting = Arc::clone(&accepting);
        let server_answer_pings = Arc::clone(&answer_pings);
        let server_handshakes = Arc::clone(&handshakes);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                if !server_accepting.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }

                // Subscribe before the handshake so nothing sent right after it is missed.
                let mut control_rx = server_control.subscribe();
                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                server_handshakes.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let answer_pings = Arc::clone(&server_answer_pings);

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        if text == "ping"
                                            && answer_pings.load(Ordering::SeqCst)
                                            && write.send(Message::Text(PONG_FRAME.into())).await.is_err()
                                        {
                                            break;
                                        }
                                        drop(received_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        drop(write.close().await);
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = control_rx.recv() => {
                                match command {
                                    Ok(ServerCommand::Text(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ServerCommand::Close(code)) => {
                                        let frame = CloseFrame {
                                            code: CloseCode::from(code),
                                            reason: "server closing".into(),
                                        };
                                        drop(write.send(Message::Close(Some(frame))).await);
                                        break;
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            control_tx,
            received_rx,
            accepting,
            answer_pings,
            handshakes,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Send a text frame to all connected clients.
    pub fn send(&self, text: &str) {
        drop(self.control_tx.send(ServerCommand::Text(text.to_owned())));
    }

    /// Close every connected client with `code`.
    pub fn close_all(&self, code: u16) {
        drop(self.control_tx.send(ServerCommand::Close(code)));
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.answer_pings.store(answer, Ordering::SeqCst);
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Receive the next text frame sent by a client, skipping liveness probes.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            let text = timeout(RECV_TIMEOUT, self.received_rx.recv())
                .await
                .ok()
                .flatten()?;
            if text != "ping" {
                return Some(text);
            }
        }
    }

    /// Receive the next text frame sent by a client, liveness probes included.
    pub async fn recv_raw(&mut self) -> Option<String> {
        timeout(RECV_TIMEOUT, self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Short timers so tests run in milliseconds.
pub fn fast_config() -> Config {
    Config::builder()
        .heartbeat_interval(Duration::from_secs(60))
        .heartbeat_timeout(Duration::from_millis(200))
        .connect_timeout(Duration::from_secs(2))
        .close_timeout(Duration::from_millis(500))
        .reconnect(
            ReconnectConfig::builder()
                .max_attempts(3)
                .initial_backoff(Duration::from_millis(20))
                .max_backoff(Duration::from_millis(100))
                .build(),
        )
        .build()
}

pub async fn next_event(events: &mut broadcast::Receiver<Event>) -> Event {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches `predicate`.
pub async fn wait_for<P>(events: &mut broadcast::Receiver<Event>, predicate: P) -> Event
where
    P: Fn(&Event) -> bool,
{
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// Collect every event emitted within `window`.
pub async fn drain_for(events: &mut broadcast::Receiver<Event>, window: Duration) -> Vec<Event> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}
