//! Channel transport.
//!
//! The session talks to the relay through the [`Transport`] trait. Frames
//! are handed up undecoded so malformed messages are dropped by the codec,
//! not by the socket layer.

use thiserror::Error;

/// Transport failures. All of them are recovered by reconnecting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Send failed: {0}")]
    Send(String),
}

/// Events from the transport, drained by the session on each poll.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    /// The socket closed (either side).
    Disconnected,
    /// A text frame.
    Text(String),
    Error { message: String },
}

/// A bidirectional text channel to the relay.
pub trait Transport {
    fn connect(&mut self, url: &str) -> Result<(), TransportError>;
    fn disconnect(&mut self);
    fn send(&self, msg: &str) -> Result<(), TransportError>;
    /// Pending events (non-blocking).
    fn poll_events(&mut self) -> Vec<TransportEvent>;
}

mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client running the blocking socket on a background thread.
    pub struct NativeWebSocket {
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<TransportEvent>>,
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        pub fn new() -> Self {
            Self {
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for NativeWebSocket {
        fn connect(&mut self, url: &str) -> Result<(), TransportError> {
            if self.cmd_tx.is_some() {
                return Err(TransportError::AlreadyConnected);
            }

            let parsed_url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
            if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    parsed_url.scheme()
                )));
            }

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<TransportEvent>();
            let url = url.to_string();

            let handle = thread::spawn(move || run_socket(&url, cmd_rx, event_tx));

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);
            Ok(())
        }

        fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
        }

        fn send(&self, msg: &str) -> Result<(), TransportError> {
            match &self.cmd_tx {
                Some(tx) => tx
                    .send(WsCommand::Send(msg.to_string()))
                    .map_err(|e| TransportError::Send(e.to_string())),
                None => Err(TransportError::NotConnected),
            }
        }

        fn poll_events(&mut self) -> Vec<TransportEvent> {
            let mut events = Vec::new();
            let mut closed = false;
            if let Some(rx) = &self.event_rx {
                loop {
                    match rx.try_recv() {
                        Ok(event) => {
                            closed |= matches!(
                                event,
                                TransportEvent::Disconnected | TransportEvent::Error { .. }
                            );
                            events.push(event);
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            closed = true;
                            break;
                        }
                    }
                }
            }
            // The socket thread has exited; allow a fresh connect.
            if closed {
                self.cmd_tx = None;
                self.event_rx = None;
                self._thread = None;
            }
            events
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }

    fn run_socket(url: &str, cmd_rx: Receiver<WsCommand>, event_tx: Sender<TransportEvent>) {
        log::info!("WebSocket thread: connecting to {}", url);

        let (mut socket, response) = match connect(url) {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("WebSocket connection failed: {}", e);
                let _ = event_tx.send(TransportEvent::Error {
                    message: format!("Connection failed: {}", e),
                });
                return;
            }
        };
        log::info!("WebSocket connected, status: {}", response.status());
        let _ = event_tx.send(TransportEvent::Connected);

        // Short read timeout so the loop can service outgoing commands.
        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
        }

        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    if let Err(e) = socket.send(Message::text(msg)) {
                        log::error!("WebSocket send error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error {
                            message: format!("Send failed: {}", e),
                        });
                        return;
                    }
                }
                Ok(WsCommand::Close) => {
                    log::info!("WebSocket close requested");
                    let _ = socket.close(None);
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => {}
            }

            match socket.read() {
                Ok(Message::Text(txt)) => {
                    let _ = event_tx.send(TransportEvent::Text(txt.to_string()));
                }
                Ok(Message::Ping(data)) => {
                    let _ = socket.send(Message::Pong(data));
                }
                Ok(Message::Close(_)) => {
                    log::info!("WebSocket received close frame");
                    break;
                }
                Ok(_) => {}
                Err(tungstenite::Error::Io(ref e))
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    log::error!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error {
                        message: format!("Read failed: {}", e),
                    });
                    return;
                }
            }
        }

        log::info!("WebSocket thread exiting");
        let _ = event_tx.send(TransportEvent::Disconnected);
    }
}

pub use native_client::NativeWebSocket;
