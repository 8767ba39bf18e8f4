//! Peer File Service: serves this peer's catalog to other peers.
//!
//! Every request gets exactly one response, except QUIT which closes the connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use share_core::protocol::{
    error_response, success_response, FileContent, FileListing, FILE_REMOVED, UNSUPPORTED_COMMAND,
};
use share_core::{human_size, Catalog, CatalogError, Channel, FileRequest, ProtocolError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;

/// What the connection loop does after handling one request.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Reply(Value),
    Close,
}

pub struct FileService {
    listener: TcpListener,
    catalog: Arc<Catalog>,
    max_frame_len: u32,
}

impl FileService {
    pub async fn bind(config: &Config) -> std::io::Result<Self> {
        let listener = TcpListener::bind((config.bind, config.port)).await?;
        let catalog = Catalog::new(&config.root, config.catalog.clone());
        info!(
            addr = %listener.local_addr()?,
            root = %config.root.display(),
            "file service listening"
        );
        Ok(Self {
            listener,
            catalog: Arc::new(catalog),
            max_frame_len: config.max_frame_len,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    /// Serve until `shutdown` resolves; in-flight requests are answered before returning.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!(%addr, "file client connected");
                        tasks.spawn(handle_connection(
                            stream,
                            addr,
                            self.catalog.clone(),
                            self.max_frame_len,
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
        let _ = stop_tx.send(true);
        while tasks.join_next().await.is_some() {}
        info!("file service stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    catalog: Arc<Catalog>,
    max_frame_len: u32,
    mut stop: watch::Receiver<bool>,
) {
    let mut channel = Channel::new(stream).with_max_frame_len(max_frame_len);
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
        let outcome = match received {
            Ok(Some(msg)) => respond(&catalog, &msg).await,
            Ok(None) => break,
            Err(e) if e.is_recoverable() => {
                warn!(%addr, error = %e, "malformed request");
                Outcome::Reply(error_response(format!("malformed request: {}", e)))
            }
            Err(e) => {
                debug!(%addr, error = %e, "connection failed");
                break;
            }
        };
        match outcome {
            Outcome::Reply(reply) => {
                if let Err(e) = channel.send(&reply).await {
                    debug!(%addr, error = %e, "failed to send response");
                    break;
                }
            }
            Outcome::Close => {
                debug!(%addr, "client sent QUIT");
                break;
            }
        }
    }
    let _ = channel.shutdown().await;
    debug!(%addr, "file client disconnected");
}

/// Handle one decoded message against the catalog.
pub async fn respond(catalog: &Catalog, msg: &Value) -> Outcome {
    let request = match FileRequest::decode(msg) {
        Ok(r) => r,
        Err(ProtocolError::UnknownMethod { method, .. }) => {
            warn!(%method, "unsupported command");
            return Outcome::Reply(error_response(UNSUPPORTED_COMMAND));
        }
        Err(e) => {
            warn!(error = %e, "rejected request");
            return Outcome::Reply(error_response(e));
        }
    };
    debug!(method = %request.method(), "file request");
    let reply = match request {
        FileRequest::List => match catalog.list().await {
            Ok(entries) => {
                let files = entries
                    .into_iter()
                    .map(|e| (e.filename, human_size(e.size)))
                    .collect();
                to_reply(&FileListing { files })
            }
            Err(e) => catalog_error(e),
        },
        FileRequest::Retrieve { filename } => match catalog.read(&filename).await {
            Ok(bytes) => to_reply(&FileContent {
                content: BASE64.encode(bytes),
                filename,
            }),
            Err(e) => catalog_error(e),
        },
        FileRequest::Store { filename, content } => match BASE64.decode(content.as_bytes()) {
            Ok(bytes) => match catalog.write(&filename, &bytes).await {
                Ok(()) => {
                    info!(%filename, bytes = bytes.len(), "stored file");
                    success_response(true)
                }
                Err(e) => catalog_error(e),
            },
            Err(_) => error_response("invalid content encoding"),
        },
        FileRequest::Delete { filename } => match catalog.remove(&filename).await {
            Ok(()) => {
                info!(%filename, "deleted file");
                success_response(FILE_REMOVED)
            }
            Err(e) => catalog_error(e),
        },
        FileRequest::Quit => return Outcome::Close,
    };
    Outcome::Reply(reply)
}

fn catalog_error(e: CatalogError) -> Value {
    if let CatalogError::Io(io) = &e {
        warn!(error = %io, "catalog io failure");
    }
    error_response(e)
}

fn to_reply<T: serde::Serialize>(body: &T) -> Value {
    serde_json::to_value(body).unwrap_or_else(error_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use share_core::CatalogPolicy;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Catalog) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"apple pie").unwrap();
        let catalog = Catalog::new(dir.path(), CatalogPolicy::default());
        (dir, catalog)
    }

    fn reply(outcome: Outcome) -> Value {
        match outcome {
            Outcome::Reply(v) => v,
            Outcome::Close => panic!("unexpected close"),
        }
    }

    #[tokio::test]
    async fn list_reports_human_sizes() {
        let (_dir, cat) = setup();
        let v = reply(respond(&cat, &json!({"method": "LIST"})).await);
        assert_eq!(v, json!({"files": [["notes.txt", "9.0B"]]}));
    }

    #[tokio::test]
    async fn retrieve_missing_then_present() {
        let (_dir, cat) = setup();
        let v = reply(respond(&cat, &json!({"method": "RETRIEVE", "filename": "nope"})).await);
        assert_eq!(v, json!({"error": "file does not exist"}));
        let v = reply(respond(&cat, &json!({"method": "retrieve", "filename": "notes.txt"})).await);
        assert_eq!(v["filename"], "notes.txt");
        assert_eq!(
            BASE64.decode(v["content"].as_str().unwrap()).unwrap(),
            b"apple pie"
        );
    }

    #[tokio::test]
    async fn store_acknowledges_and_overwrites() {
        let (dir, cat) = setup();
        let body = BASE64.encode(b"fresh");
        let v = reply(
            respond(
                &cat,
                &json!({"method": "STORE", "filename": "notes.txt", "content": body}),
            )
            .await,
        );
        assert_eq!(v, json!({"success": true}));
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"fresh");
        let v = reply(
            respond(
                &cat,
                &json!({"method": "STORE", "filename": "x", "content": "***"}),
            )
            .await,
        );
        assert_eq!(v, json!({"error": "invalid content encoding"}));
    }

    #[tokio::test]
    async fn delete_then_delete_again() {
        let (dir, cat) = setup();
        let req = json!({"method": "DELETE", "filename": "notes.txt"});
        assert_eq!(
            reply(respond(&cat, &req).await),
            json!({"success": "file removed"})
        );
        assert!(!dir.path().join("notes.txt").exists());
        assert_eq!(
            reply(respond(&cat, &req).await),
            json!({"error": "file does not exist"})
        );
    }

    #[tokio::test]
    async fn traversal_is_refused() {
        let (_dir, cat) = setup();
        let v = reply(respond(&cat, &json!({"method": "RETRIEVE", "filename": "../etc/passwd"})).await);
        assert!(v["error"].as_str().unwrap().starts_with("invalid filename"));
        let v = reply(
            respond(
                &cat,
                &json!({"method": "STORE", "filename": "/tmp/evil", "content": ""}),
            )
            .await,
        );
        assert!(v["error"].as_str().unwrap().starts_with("invalid filename"));
    }

    #[tokio::test]
    async fn malformed_and_unknown_requests() {
        let (_dir, cat) = setup();
        let v = reply(respond(&cat, &json!({"filename": "notes.txt"})).await);
        assert!(v["error"].as_str().unwrap().contains("malformed request"));
        let v = reply(respond(&cat, &json!({"method": "RETRIEVE"})).await);
        assert!(v["error"].as_str().unwrap().contains("missing or invalid field"));
        let v = reply(respond(&cat, &json!({"method": "RETRIEVEALL", "filename": "notes.txt"})).await);
        assert_eq!(v, json!({"error": "Unsupported command"}));
    }

    #[tokio::test]
    async fn quit_closes() {
        let (_dir, cat) = setup();
        assert_eq!(respond(&cat, &json!({"method": "QUIT"})).await, Outcome::Close);
    }
}
