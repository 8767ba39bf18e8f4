//! KEYWORD fan-out: fetch each candidate from its owner's File Service and keep the ones whose text contains the keyword.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use share_core::protocol::parse_host_port;
use share_core::{ClientError, ListingEntry, PeerClient};
use tracing::debug;

/// Limits for one KEYWORD query.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub concurrency: usize,
    pub connect_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Largest RETRIEVE reply accepted from a File Service.
    pub max_frame_len: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            connect_timeout: Duration::from_secs(3),
            fetch_timeout: Duration::from_secs(10),
            max_frame_len: 16 * 1024 * 1024,
        }
    }
}

/// Candidates whose content contains `keyword`, in candidate order.
/// A candidate that cannot be fetched is left out; it never fails the query.
pub async fn search(
    candidates: Vec<ListingEntry>,
    keyword: &str,
    opts: SearchOptions,
) -> Vec<ListingEntry> {
    stream::iter(candidates)
        .map(|entry| async move {
            let fetched =
                tokio::time::timeout(opts.fetch_timeout, fetch_text(&entry, &opts))
                    .await;
            match fetched {
                Ok(Ok(text)) if text.contains(keyword) => Some(entry),
                Ok(Ok(_)) => None,
                Ok(Err(e)) => {
                    debug!(file = %entry.filename, host = %entry.hostname, error = %e, "keyword fetch failed");
                    None
                }
                Err(_) => {
                    debug!(file = %entry.filename, host = %entry.hostname, "keyword fetch timed out");
                    None
                }
            }
        })
        .buffered(opts.concurrency.max(1))
        .filter_map(|hit| async move { hit })
        .collect()
        .await
}

async fn fetch_text(entry: &ListingEntry, opts: &SearchOptions) -> Result<String, ClientError> {
    let (host, port) = parse_host_port(&entry.hostname)
        .ok_or_else(|| ClientError::Protocol(format!("bad hostname {:?}", entry.hostname)))?;
    let mut client = PeerClient::new()
        .with_connect_timeout(opts.connect_timeout)
        .with_max_frame_len(opts.max_frame_len);
    client.connect(&host, port).await?;
    let text = client.retrieve_string(&entry.filename).await;
    let _ = client.quit().await;
    text
}
