//! SharePod Directory Server: tracks which peers are online and what they share,
//! and answers LIST and KEYWORD queries.

pub mod config;
pub mod registry;
pub mod search;
pub mod server;

pub use config::Config;
pub use registry::{ConnectionId, Peer, Registry, RegistryError};
pub use search::SearchOptions;
pub use server::{DirectoryServer, SharedRegistry};
