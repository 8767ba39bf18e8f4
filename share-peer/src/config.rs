//! Load config from file and environment.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use share_core::CatalogPolicy;

/// Peer configuration. File: ~/.config/sharepod/peer.toml or /etc/sharepod/peer.toml.
/// Env overrides: SHAREPOD_PEER_BIND, SHAREPOD_PEER_PORT, SHAREPOD_PEER_ROOT, SHAREPOD_DIRECTORY,
/// SHAREPOD_USERNAME, SHAREPOD_ADVERTISE, SHAREPOD_SPEED.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// File Service listen address (default 0.0.0.0).
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// File Service listen port (default 1234).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory whose files are shared (default: working directory).
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub catalog: CatalogPolicy,
    /// Largest accepted request frame in bytes (default 256 MiB).
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: u32,
    /// Directory Server `address:port` to announce to, if any.
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_username")]
    pub username: String,
    /// `address:port` other peers use to reach this File Service (default 127.0.0.1:<port>).
    #[serde(default)]
    pub advertise: Option<String>,
    /// Link speed label sent at CONNECT (default "gigabit").
    #[serde(default = "default_speed")]
    pub speed: String,
}

fn default_bind() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}
fn default_port() -> u16 {
    share_core::FILE_SERVICE_PORT
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_max_frame_len() -> u32 {
    256 * 1024 * 1024
}
fn default_username() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anonymous".to_string())
}
fn default_speed() -> String {
    "gigabit".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            root: default_root(),
            catalog: CatalogPolicy::default(),
            max_frame_len: default_max_frame_len(),
            directory: None,
            username: default_username(),
            advertise: None,
            speed: default_speed(),
        }
    }
}

impl Config {
    /// Hostname announced to the Directory Server.
    pub fn advertised_hostname(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", self.port))
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
    if let Some(b) = var("SHAREPOD_PEER_BIND").and_then(|s| s.parse().ok()) {
        c.bind = b;
    }
    if let Some(p) = var("SHAREPOD_PEER_PORT").and_then(|s| s.parse().ok()) {
        c.port = p;
    }
    if let Some(r) = var("SHAREPOD_PEER_ROOT") {
        c.root = PathBuf::from(r);
    }
    if let Some(d) = var("SHAREPOD_DIRECTORY") {
        c.directory = Some(d);
    }
    if let Some(u) = var("SHAREPOD_USERNAME") {
        c.username = u;
    }
    if let Some(a) = var("SHAREPOD_ADVERTISE") {
        c.advertise = Some(a);
    }
    if let Some(s) = var("SHAREPOD_SPEED") {
        c.speed = s;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/sharepod/peer.toml"));
    }
    out.push(PathBuf::from("/etc/sharepod/peer.toml"));
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
