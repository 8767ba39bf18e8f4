//! Front-end session: the operations a GUI or shell drives.
//!
//! Directory traffic goes over one long-lived channel (the registration lives as long as it
//! does); transfers open a short connection straight to the owning peer's File Service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use share_core::protocol::parse_host_port;
use share_core::{
    Announcement, Catalog, CatalogError, CatalogPolicy, ClientError, FileDescriptor, ListingEntry,
    PeerClient, DIRECTORY_PORT,
};
use tracing::info;

pub struct Session {
    directory: PeerClient,
    catalog: Catalog,
    connect_timeout: Duration,
}

impl Session {
    /// `catalog` is what this peer announces at connect time.
    pub fn new(catalog: Catalog) -> Self {
        Self {
            directory: PeerClient::new(),
            catalog,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.directory.is_connected()
    }

    /// Register with the Directory Server at `server_addr` (`host[:port]`), announcing the local catalog.
    pub async fn connect(
        &mut self,
        server_addr: &str,
        username: &str,
        hostname: &str,
        speed: &str,
    ) -> Result<String, ClientError> {
        if self.directory.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        let (host, port) = parse_host_port(server_addr)
            .unwrap_or_else(|| (server_addr.to_string(), DIRECTORY_PORT));
        let files = self
            .catalog
            .list()
            .await
            .map_err(catalog_error)?
            .into_iter()
            .map(|e| FileDescriptor {
                filename: e.filename,
            })
            .collect::<Vec<_>>();
        let count = files.len();
        let mut client = PeerClient::new().with_connect_timeout(self.connect_timeout);
        client.connect(&host, port).await?;
        let announced = client
            .announce(Announcement {
                username: username.to_string(),
                hostname: hostname.to_string(),
                speed: speed.to_string(),
                files,
            })
            .await;
        match announced {
            Ok(msg) => {
                info!(%host, port, files = count, "registered with directory");
                self.directory = client;
                Ok(msg)
            }
            Err(e) => {
                client.disconnect().await;
                Err(e)
            }
        }
    }

    /// Leave the directory; the server drops this peer's files.
    pub async fn disconnect(&mut self) {
        self.directory.disconnect().await;
    }

    pub async fn list(&mut self) -> Result<Vec<ListingEntry>, ClientError> {
        self.directory.list_directory().await
    }

    pub async fn search(&mut self, keyword: &str) -> Result<Vec<ListingEntry>, ClientError> {
        self.directory.search(keyword).await
    }

    /// Download `entry` from its owner into `dest_dir`. Returns the written path.
    pub async fn retrieve(&self, entry: &ListingEntry, dest_dir: &Path) -> Result<PathBuf, ClientError> {
        let mut peer = self.open_peer(&entry.hostname).await?;
        let bytes = peer.retrieve(&entry.filename).await;
        let _ = peer.quit().await;
        let bytes = bytes?;
        let dest = Catalog::new(
            dest_dir,
            CatalogPolicy {
                exclude_extensions: Vec::new(),
                exclude_hidden: false,
            },
        );
        dest.write(&entry.filename, &bytes).await.map_err(catalog_error)?;
        info!(file = %entry.filename, from = %entry.hostname, bytes = bytes.len(), "retrieved file");
        Ok(dest_dir.join(&entry.filename))
    }

    /// Upload a local file to the peer at `hostname`. Returns the remote file name.
    pub async fn store(&self, hostname: &str, path: &Path) -> Result<String, ClientError> {
        let mut peer = self.open_peer(hostname).await?;
        let stored = peer.store(path).await;
        let _ = peer.quit().await;
        stored
    }

    pub async fn delete(&self, hostname: &str, filename: &str) -> Result<(), ClientError> {
        let mut peer = self.open_peer(hostname).await?;
        let deleted = peer.delete(filename).await;
        let _ = peer.quit().await;
        deleted
    }

    async fn open_peer(&self, hostname: &str) -> Result<PeerClient, ClientError> {
        let (host, port) = parse_host_port(hostname)
            .ok_or_else(|| ClientError::Protocol(format!("bad hostname {:?}", hostname)))?;
        let mut peer = PeerClient::new().with_connect_timeout(self.connect_timeout);
        peer.connect(&host, port).await?;
        Ok(peer)
    }
}

fn catalog_error(e: CatalogError) -> ClientError {
    match e {
        CatalogError::Io(io) => ClientError::Io(io),
        other => ClientError::Protocol(other.to_string()),
    }
}
