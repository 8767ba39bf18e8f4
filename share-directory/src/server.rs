//! Directory Server: accept loop and per-connection request dispatch.
//!
//! Each connection starts unregistered and must CONNECT before LIST or KEYWORD are served.
//! Its registry entry is removed when the connection's read loop sees end-of-stream.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use share_core::protocol::{error_response, parse_host_port, success_response};
use share_core::{Channel, DirectoryRequest};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::registry::{ConnectionId, Peer, Registry, RegistryError};
use crate::search::{self, SearchOptions};

/// Registry shared by every connection task.
pub type SharedRegistry = Arc<Mutex<Registry>>;

const NOT_REGISTERED: &str =
    "peer is not registered: the first request must be CONNECT; valid methods are CONNECT, LIST, KEYWORD";

#[derive(Debug, Clone, Copy)]
struct Limits {
    search: SearchOptions,
    max_frame_len: u32,
}

pub struct DirectoryServer {
    listener: TcpListener,
    registry: SharedRegistry,
    limits: Limits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    Unregistered,
    Registered,
}

impl DirectoryServer {
    pub async fn bind(config: &Config) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.bind, config.port)).await?;
        info!(addr = %listener.local_addr()?, "directory server listening");
        Ok(Self {
            listener,
            registry: Arc::new(Mutex::new(Registry::new())),
            limits: Limits {
                search: SearchOptions {
                    concurrency: config.search_concurrency,
                    connect_timeout: config.connect_timeout(),
                    fetch_timeout: config.fetch_timeout(),
                    max_frame_len: config.max_frame_len,
                },
                max_frame_len: config.max_frame_len,
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Serve until `shutdown` resolves, then stop accepting and wait for
    /// connections to finish the request they are handling.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let conn = ConnectionId::next();
                        info!(%conn, %addr, "peer connected");
                        tasks.spawn(handle_connection(
                            stream,
                            conn,
                            self.registry.clone(),
                            self.limits,
                            stop_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }
        drop(self.listener);
        info!(open = tasks.len(), "directory server shutting down");
        let _ = stop_tx.send(true);
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    conn: ConnectionId,
    registry: SharedRegistry,
    limits: Limits,
    mut stop: watch::Receiver<bool>,
) {
    let mut channel = Channel::new(stream).with_max_frame_len(limits.max_frame_len);
    let mut state = ConnState::Unregistered;
    let mut first_byte = [0u8; 1];
    loop {
        // Once the first byte of a request is in, the turn completes even during shutdown.
        let arrived = tokio::select! {
            _ = stop.changed() => false,
            _ = channel.get_ref().peek(&mut first_byte) => true,
        };
        if !arrived {
            break;
        }
        let received = channel.receive().await;
        let reply = match received {
            Ok(Some(msg)) => {
                debug!(%conn, request = %msg, "received request");
                respond(conn, &mut state, &registry, limits, &msg).await
            }
            Ok(None) => break,
            Err(e) if e.is_recoverable() => {
                warn!(%conn, error = %e, "malformed request");
                error_response(format!("malformed request: {}", e))
            }
            Err(e) => {
                debug!(%conn, error = %e, "connection failed");
                break;
            }
        };
        if let Err(e) = channel.send(&reply).await {
            debug!(%conn, error = %e, "failed to send response");
            break;
        }
    }
    if let Some(peer) = registry.lock().await.remove(conn) {
        info!(%conn, username = %peer.username, hostname = %peer.hostname, "peer left");
    } else {
        info!(%conn, "client disconnected");
    }
}

async fn respond(
    conn: ConnectionId,
    state: &mut ConnState,
    registry: &SharedRegistry,
    limits: Limits,
    msg: &Value,
) -> Value {
    let request = match DirectoryRequest::decode(msg) {
        Ok(r) => r,
        Err(e) => {
            warn!(%conn, error = %e, "rejected request");
            return error_response(e);
        }
    };
    match (*state, request) {
        (ConnState::Unregistered, DirectoryRequest::Connect(announcement)) => {
            if parse_host_port(&announcement.hostname).is_none() {
                return error_response(format!(
                    "invalid hostname {:?}: expected address:port",
                    announcement.hostname
                ));
            }
            let username = announcement.username.clone();
            let peer = Peer::from(announcement);
            let files = peer.catalog.len();
            let hostname = peer.hostname.clone();
            if let Err(e) = registry.lock().await.register(conn, peer) {
                return error_response(e);
            }
            *state = ConnState::Registered;
            info!(%conn, %username, %hostname, files, "peer registered");
            success_response(format!("connected as {}", username))
        }
        (ConnState::Unregistered, _) => error_response(NOT_REGISTERED),
        (ConnState::Registered, DirectoryRequest::Connect(_)) => {
            error_response(RegistryError::AlreadyRegistered)
        }
        (ConnState::Registered, DirectoryRequest::List) => {
            let listing = registry.lock().await.listing_excluding(conn);
            to_reply(&listing)
        }
        (ConnState::Registered, DirectoryRequest::Keyword { keyword }) => {
            // Snapshot under the lock; fetches run without it.
            let candidates = registry.lock().await.listing_excluding(conn);
            let total = candidates.len();
            let hits = search::search(candidates, &keyword, limits.search).await;
            debug!(%conn, %keyword, candidates = total, hits = hits.len(), "keyword search");
            to_reply(&hits)
        }
    }
}

fn to_reply<T: Serialize>(body: &T) -> Value {
    serde_json::to_value(body).unwrap_or_else(error_response)
}
