//! In-process feed server and fixtures shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;

use marketdata_stream::infrastructure::feed::{HeartbeatConfig, ReconnectConfig};
use marketdata_stream::{
    AuthError, ConnectionEvent, DirectoryHandle, InstrumentDirectory, InstrumentRecord,
    StreamConfig, TokenProvider,
};

/// Command pushed to every live server-side session.
#[derive(Debug, Clone)]
pub enum ServerCommand {
    Send(Message),
    Drop,
}

/// Minimal WebSocket feed that records what clients send.
pub struct FeedServer {
    pub addr: SocketAddr,
    paths: Arc<Mutex<Vec<String>>>,
    sessions: Arc<Mutex<Vec<Vec<String>>>>,
    rejected: Arc<Mutex<HashSet<String>>>,
    accept_delay: Arc<Mutex<Duration>>,
    commands: broadcast::Sender<ServerCommand>,
}

impl FeedServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (commands, _) = broadcast::channel(64);

        let server = Self {
            addr,
            paths: Arc::default(),
            sessions: Arc::default(),
            rejected: Arc::default(),
            accept_delay: Arc::default(),
            commands,
        };

        let paths = Arc::clone(&server.paths);
        let sessions = Arc::clone(&server.sessions);
        let rejected = Arc::clone(&server.rejected);
        let accept_delay = Arc::clone(&server.accept_delay);
        let commands = server.commands.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let paths = Arc::clone(&paths);
                let sessions = Arc::clone(&sessions);
                let rejected = Arc::clone(&rejected);
                let mut command_rx = commands.subscribe();
                let delay = *accept_delay.lock();

                tokio::spawn(async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }

                    let callback = |request: &Request, response: Response| {
                        let path = request.uri().path().to_string();
                        paths.lock().push(path.clone());
                        let token = path.rsplit('/').next().unwrap_or_default();
                        if rejected.lock().contains(token) {
                            let denied: ErrorResponse = http::Response::builder()
                                .status(http::StatusCode::UNAUTHORIZED)
                                .body(Some("invalid token".to_string()))
                                .unwrap();
                            return Err(denied);
                        }
                        Ok(response)
                    };

                    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };

                    let index = {
                        let mut sessions = sessions.lock();
                        sessions.push(Vec::new());
                        sessions.len() - 1
                    };

                    loop {
                        tokio::select! {
                            msg = ws.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    sessions.lock()[index].push(text.as_str().to_owned());
                                }
                                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                Some(Ok(_)) => {}
                            },
                            command = command_rx.recv() => match command {
                                Ok(ServerCommand::Send(message)) => {
                                    if ws.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(ServerCommand::Drop) | Err(broadcast::error::RecvError::Closed) => break,
                                Err(broadcast::error::RecvError::Lagged(_)) => {}
                            },
                        }
                    }
                });
            }
        });

        server
    }

    pub fn url(&self) -> String {
        format!("ws://{}/stream", self.addr)
    }

    /// Answer handshakes carrying `token` with HTTP 401.
    pub fn reject_token(&self, token: &str) {
        self.rejected.lock().insert(token.to_string());
    }

    /// Hold each later handshake open for `delay` before answering.
    pub fn delay_handshakes(&self, delay: Duration) {
        *self.accept_delay.lock() = delay;
    }

    /// Push a command to every open session.
    pub fn command(&self, command: ServerCommand) {
        let _ = self.commands.send(command);
    }

    /// Paths of every handshake, rejected ones included.
    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }

    /// Number of accepted sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Text frames received on session `index`.
    pub fn frames(&self, index: usize) -> Vec<String> {
        self.sessions.lock().get(index).cloned().unwrap_or_default()
    }
}

/// Token provider that moves to the next token on every refresh.
pub struct RotatingTokens {
    tokens: Vec<String>,
    current: AtomicUsize,
    refreshes: AtomicUsize,
}

impl RotatingTokens {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| (*t).to_string()).collect(),
            current: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    fn token_at(&self, index: usize) -> String {
        self.tokens[index.min(self.tokens.len() - 1)].clone()
    }
}

#[async_trait]
impl TokenProvider for RotatingTokens {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.token_at(self.current.load(Ordering::SeqCst)))
    }

    async fn refresh(&self) -> Result<String, AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let next = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.token_at(next))
    }
}

pub fn directory() -> DirectoryHandle {
    DirectoryHandle::new(InstrumentDirectory::from_records([
        InstrumentRecord::new("NSECM", "RELIANCE", 100),
        InstrumentRecord::new("NSECM", "TCS", 200),
        InstrumentRecord::new("NSEFO", "NIFTY24JANFUT", 300),
    ]))
}

/// Stream config with short timings for tests.
pub fn fast_config(url: String) -> StreamConfig {
    let mut config = StreamConfig::new(url);
    config.heartbeat = HeartbeatConfig::new(Duration::from_secs(60));
    config.reconnect = ReconnectConfig::new(Duration::from_millis(100), true);
    config.connect_timeout = Duration::from_secs(2);
    config.shutdown_timeout = Duration::from_secs(1);
    config
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Receive events until one matches `pred`, collecting everything seen.
pub async fn events_until(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    limit: Duration,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(event)) => {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => {}
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return seen,
        }
    }
}
