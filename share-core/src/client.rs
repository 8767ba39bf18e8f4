//! Peer Client: the outbound half of the protocol.
//!
//! Holds at most one channel, to either a Directory Server or another peer's File Service,
//! and runs one request/response turn per call.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::channel::{Channel, ChannelError};
use crate::protocol::{
    error_of, Announcement, DirectoryRequest, FileContent, FileListing, FileRequest,
    ListingEntry, SUCCESS_FIELD,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("a connection must be established first")]
    NotConnected,
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to {0}")]
    Timeout(String),
    #[error("connection closed by remote")]
    Disconnected,
    /// The remote answered with an `error` field.
    #[error("{0}")]
    Remote(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
    #[error("content of {0} is not text")]
    NotText(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One outbound connection at a time.
#[derive(Default)]
pub struct PeerClient {
    channel: Option<Channel<TcpStream>>,
    remote: Option<String>,
    connect_timeout: Option<Duration>,
    max_frame_len: Option<u32>,
}

impl PeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound how long `connect` may wait for the transport.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Refuse replies whose frame is longer than `len` bytes.
    pub fn with_max_frame_len(mut self, len: u32) -> Self {
        self.max_frame_len = Some(len);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// `address:port` of the current connection.
    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }

    pub async fn connect(&mut self, address: &str, port: u16) -> Result<(), ClientError> {
        if self.channel.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let addr = format!("{}:{}", address, port);
        let connecting = TcpStream::connect((address, port));
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| ClientError::Timeout(addr.clone()))?,
            None => connecting.await,
        }
        .map_err(|source| ClientError::ConnectFailed {
            addr: addr.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        info!(%addr, "connected");
        let channel = Channel::new(stream);
        self.channel = Some(match self.max_frame_len {
            Some(len) => channel.with_max_frame_len(len),
            None => channel,
        });
        self.remote = Some(addr);
        Ok(())
    }

    /// Close the channel if one is open.
    pub async fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.shutdown().await;
            if let Some(addr) = self.remote.take() {
                info!(%addr, "disconnected");
            }
        }
        self.remote = None;
    }

    // --- Peer File Service commands ---

    /// `(filename, human_size)` rows of the remote catalog.
    pub async fn list(&mut self) -> Result<Vec<(String, String)>, ClientError> {
        let listing: FileListing = self.call(&FileRequest::List).await?;
        Ok(listing.files)
    }

    pub async fn retrieve(&mut self, filename: &str) -> Result<Vec<u8>, ClientError> {
        let reply: FileContent = self
            .call(&FileRequest::Retrieve {
                filename: filename.to_string(),
            })
            .await?;
        BASE64
            .decode(reply.content.as_bytes())
            .map_err(|e| ClientError::Protocol(format!("content is not base64: {}", e)))
    }

    /// RETRIEVE decoded as UTF-8 text.
    pub async fn retrieve_string(&mut self, filename: &str) -> Result<String, ClientError> {
        let bytes = self.retrieve(filename).await?;
        String::from_utf8(bytes).map_err(|_| ClientError::NotText(filename.to_string()))
    }

    /// Upload a local file under its base name.
    pub async fn store(&mut self, path: &Path) -> Result<String, ClientError> {
        self.require_connection()?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::Protocol(format!("no file name in {}", path.display())))?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        self.store_bytes(&filename, &bytes).await?;
        Ok(filename)
    }

    pub async fn store_bytes(&mut self, filename: &str, bytes: &[u8]) -> Result<(), ClientError> {
        let _: Value = self
            .call(&FileRequest::Store {
                filename: filename.to_string(),
                content: BASE64.encode(bytes),
            })
            .await?;
        Ok(())
    }

    pub async fn delete(&mut self, filename: &str) -> Result<(), ClientError> {
        let _: Value = self
            .call(&FileRequest::Delete {
                filename: filename.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Ask the File Service to close the session, then drop the channel.
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        let channel = self.channel.as_mut().ok_or(ClientError::NotConnected)?;
        let sent = channel.send(&FileRequest::Quit).await;
        self.disconnect().await;
        sent.map_err(|_| ClientError::Disconnected)
    }

    // --- Directory Server commands ---

    /// CONNECT: register this peer and its catalog. Returns the server's success text.
    pub async fn announce(&mut self, announcement: Announcement) -> Result<String, ClientError> {
        let reply: Value = self.call(&DirectoryRequest::Connect(announcement)).await?;
        Ok(reply
            .get(SUCCESS_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// LIST: files of every other registered peer.
    pub async fn list_directory(&mut self) -> Result<Vec<ListingEntry>, ClientError> {
        self.call(&DirectoryRequest::List).await
    }

    /// KEYWORD: files of other peers whose content contains `keyword`.
    pub async fn search(&mut self, keyword: &str) -> Result<Vec<ListingEntry>, ClientError> {
        self.call(&DirectoryRequest::Keyword {
            keyword: keyword.to_string(),
        })
        .await
    }

    fn require_connection(&self) -> Result<(), ClientError> {
        if self.channel.is_none() {
            return Err(ClientError::NotConnected);
        }
        Ok(())
    }

    /// Send one request and decode its reply, surfacing `{"error": ..}` as `Remote`.
    async fn call<Req, Resp>(&mut self, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let channel = self.channel.as_mut().ok_or(ClientError::NotConnected)?;
        let reply = match turn(channel, request).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.disconnect().await;
                return Err(ClientError::Disconnected);
            }
            Err(e) if e.is_recoverable() => return Err(ClientError::Protocol(e.to_string())),
            Err(e) => {
                debug!(error = %e, "transport failure");
                self.disconnect().await;
                return Err(ClientError::Disconnected);
            }
        };
        if let Some(error) = error_of(&reply) {
            return Err(ClientError::Remote(error.to_string()));
        }
        serde_json::from_value(reply).map_err(|e| ClientError::Protocol(e.to_string()))
    }
}

async fn turn<Req: Serialize>(
    channel: &mut Channel<TcpStream>,
    request: &Req,
) -> Result<Option<Value>, ChannelError> {
    channel.send(request).await?;
    channel.receive().await
}
