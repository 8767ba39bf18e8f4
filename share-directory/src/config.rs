//! Load config from file and environment.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Directory Server configuration. File: ~/.config/sharepod/directory.toml or /etc/sharepod/directory.toml.
/// Env overrides: SHAREPOD_DIRECTORY_BIND, SHAREPOD_DIRECTORY_PORT, SHAREPOD_SEARCH_CONCURRENCY,
/// SHAREPOD_CONNECT_TIMEOUT_MS, SHAREPOD_FETCH_TIMEOUT_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen address (default 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Listen port (default 12345).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Concurrent File Service fetches per KEYWORD query (default 8).
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
    /// Connect timeout for KEYWORD fan-out in milliseconds (default 3000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-fetch timeout for one KEYWORD candidate in milliseconds (default 10000).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Largest accepted frame in bytes, for requests and for KEYWORD fetch replies (default 16 MiB).
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    share_core::DIRECTORY_PORT
}
fn default_search_concurrency() -> usize {
    8
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_fetch_timeout_ms() -> u64 {
    10_000
}
fn default_max_frame_len() -> u32 {
    16 * 1024 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            search_concurrency: default_search_concurrency(),
            connect_timeout_ms: default_connect_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load config: merge default, then config file (explicit path or first of the standard ones), then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c = match explicit {
        Some(p) => load_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => load_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(b) = var("SHAREPOD_DIRECTORY_BIND").and_then(|s| s.parse().ok()) {
        c.bind = b;
    }
    if let Some(p) = var("SHAREPOD_DIRECTORY_PORT").and_then(|s| s.parse().ok()) {
        c.port = p;
    }
    if let Some(n) = var("SHAREPOD_SEARCH_CONCURRENCY").and_then(|s| s.parse().ok()) {
        c.search_concurrency = n;
    }
    if let Some(ms) = var("SHAREPOD_CONNECT_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
        c.connect_timeout_ms = ms;
    }
    if let Some(ms) = var("SHAREPOD_FETCH_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
        c.fetch_timeout_ms = ms;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sharepod/directory.toml"));
    }
    out.push(PathBuf::from("/etc/sharepod/directory.toml"));
    out
}

fn load_file(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
