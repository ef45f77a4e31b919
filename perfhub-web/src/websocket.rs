//! WebSocket realtime channel
//!
//! `connect` performs the first handshake inline so that a rejected token
//! surfaces as [`PerfhubError::Unauthorized`]. After that a background task
//! owns the socket: it forwards decoded frames in arrival order, sends JSON
//! keep-alive pings, and reconnects with exponential backoff until the
//! subscription is closed or dropped. A rejected reconnect or a policy close
//! ends the subscription with [`ChannelTermination::Rejected`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use perfhub_core::{
    ChannelSubscription, ChannelTermination, Credential, ErrorContext, InboundEvent, PerfhubError,
    PerfhubResult, RealtimeChannel, RealtimeConfig,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, Duration, Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const COMPONENT: &str = "websocket_channel";
const PING_FRAME: &str = r#"{"type":"ping"}"#;

/// How a live connection ended
#[derive(Debug, PartialEq)]
enum Disconnect {
    /// Subscription closed or dropped by its owner
    Shutdown,
    /// Server refused the token
    Rejected,
    /// Network or server-side close; worth reconnecting
    Dropped,
}

enum HandshakeError {
    Rejected(u16),
    Failed(tungstenite::Error),
}

/// [`RealtimeChannel`] over tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WebSocketChannel {
    config: RealtimeConfig,
}

impl WebSocketChannel {
    pub fn new(config: RealtimeConfig) -> Self {
        Self { config }
    }

    /// `{origin}/ws/{token}`
    fn endpoint(&self, credential: &Credential) -> PerfhubResult<String> {
        let raw = format!(
            "{}/ws/{}",
            self.config.url.trim_end_matches('/'),
            urlencoding::encode(&credential.access_token)
        );

        let url = url::Url::parse(&raw).map_err(|e| PerfhubError::Config {
            message: format!("Invalid realtime URL: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new(COMPONENT)
                .with_operation("endpoint")
                .with_suggestion("Set realtime.url, e.g. ws://localhost:8000"),
        })?;

        Ok(url.into())
    }

    async fn handshake(url: &str) -> Result<Socket, HandshakeError> {
        match connect_async(url).await {
            Ok((socket, _)) => Ok(socket),
            Err(tungstenite::Error::Http(response))
                if matches!(response.status().as_u16(), 401 | 403) =>
            {
                Err(HandshakeError::Rejected(response.status().as_u16()))
            }
            Err(e) => Err(HandshakeError::Failed(e)),
        }
    }
}

#[async_trait]
impl RealtimeChannel for WebSocketChannel {
    async fn connect(&self, credential: &Credential) -> PerfhubResult<ChannelSubscription> {
        let url = self.endpoint(credential)?;
        let origin = self.config.url.clone();

        let socket = match Self::handshake(&url).await {
            Ok(socket) => {
                info!(origin = %origin, "Realtime channel connected");
                Some(socket)
            }
            Err(HandshakeError::Rejected(status)) => {
                return Err(PerfhubError::Unauthorized {
                    message: format!("Realtime channel rejected the credential (HTTP {})", status),
                    context: ErrorContext::new(COMPONENT)
                        .with_operation("connect")
                        .with_suggestion("Log in again to obtain a fresh credential"),
                });
            }
            Err(HandshakeError::Failed(e)) => {
                warn!(origin = %origin, error = %e, "Realtime connect failed, will retry");
                None
            }
        };

        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer);
        let (connected_tx, connected_rx) = watch::channel(socket.is_some());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (termination_tx, termination_rx) = oneshot::channel();

        let connection = Connection {
            url,
            origin,
            config: self.config.clone(),
            events: events_tx,
            connected: connected_tx,
            termination: termination_tx,
        };
        tokio::spawn(connection.run(socket, shutdown_rx));

        Ok(ChannelSubscription::new(
            events_rx,
            connected_rx,
            shutdown_tx,
            termination_rx,
        ))
    }
}

/// Background owner of one subscription's socket
struct Connection {
    url: String,
    origin: String,
    config: RealtimeConfig,
    events: mpsc::Sender<InboundEvent>,
    connected: watch::Sender<bool>,
    /// Reported before `events` is dropped
    termination: oneshot::Sender<ChannelTermination>,
}

impl Connection {
    async fn run(self, mut socket: Option<Socket>, mut shutdown: oneshot::Receiver<()>) {
        let mut attempt = 0usize;
        let mut ended = ChannelTermination::Closed;

        loop {
            if let Some(live) = socket.take() {
                attempt = 0;
                self.connected.send_replace(true);
                let disconnect = self.pump(live, &mut shutdown).await;
                self.connected.send_replace(false);

                match disconnect {
                    Disconnect::Shutdown => break,
                    Disconnect::Rejected => {
                        warn!(origin = %self.origin, "Realtime channel closed by policy");
                        ended = ChannelTermination::Rejected;
                        break;
                    }
                    Disconnect::Dropped => {
                        debug!(origin = %self.origin, "Realtime connection dropped");
                    }
                }
            }

            attempt += 1;
            if !self.config.reconnect.allows_attempt(attempt) {
                warn!(attempts = attempt, "Giving up on realtime reconnects");
                break;
            }

            let delay = self.config.reconnect.delay_for_attempt(attempt);
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting realtime channel"
            );

            let handshake = tokio::select! {
                _ = &mut shutdown => break,
                handshake = async {
                    sleep(delay).await;
                    WebSocketChannel::handshake(&self.url).await
                } => handshake,
            };

            match handshake {
                Ok(live) => {
                    info!(origin = %self.origin, attempt = attempt, "Realtime channel reconnected");
                    socket = Some(live);
                }
                Err(HandshakeError::Rejected(status)) => {
                    warn!(status = status, "Realtime reconnect rejected the credential");
                    ended = ChannelTermination::Rejected;
                    break;
                }
                Err(HandshakeError::Failed(e)) => {
                    warn!(attempt = attempt, error = %e, "Realtime reconnect failed");
                }
            }
        }

        self.connected.send_replace(false);
        debug!(origin = %self.origin, ended = ?ended, "Realtime connection task exited");
        let _ = self.termination.send(ended);
    }

    async fn pump(&self, socket: Socket, shutdown: &mut oneshot::Receiver<()>) -> Disconnect {
        let (mut write, mut read) = socket.split();
        let mut ping = (self.config.ping_interval_secs > 0).then(|| {
            let period = Duration::from_secs(self.config.ping_interval_secs);
            interval_at(Instant::now() + period, period)
        });

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    let _ = write.send(Message::Close(None)).await;
                    return Disconnect::Shutdown;
                }
                _ = next_ping(&mut ping) => {
                    if let Err(e) = write.send(Message::Text(PING_FRAME.into())).await {
                        debug!(error = %e, "Keep-alive ping failed");
                        return Disconnect::Dropped;
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = InboundEvent::from_json(text.as_str()) {
                            if self.events.send(event).await.is_err() {
                                return Disconnect::Shutdown;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.as_ref().map(|frame| frame.code);
                        debug!(code = ?code, "Realtime server closed the connection");
                        return if code == Some(CloseCode::Policy) {
                            Disconnect::Rejected
                        } else {
                            Disconnect::Dropped
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "Realtime read failed");
                        return Disconnect::Dropped;
                    }
                    None => return Disconnect::Dropped,
                },
            }
        }
    }
}

async fn next_ping(ping: &mut Option<Interval>) {
    match ping {
        Some(ping) => {
            ping.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
