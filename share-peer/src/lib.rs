//! SharePod peer: the File Service other peers download from, the session a front end
//! drives against the Directory Server, and a textual command console.

pub mod config;
pub mod console;
pub mod file_service;
pub mod session;

pub use config::Config;
pub use console::{Command, CommandError, Console};
pub use file_service::FileService;
pub use session::Session;
