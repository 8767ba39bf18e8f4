//! Textual command console driving a [`PeerClient`] against a File Service.

use std::io::Write;
use std::path::PathBuf;

use share_core::{Catalog, CatalogPolicy, ClientError, PeerClient};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { address: String, port: u16 },
    List,
    Retrieve(String),
    Store(PathBuf),
    Delete(String),
    Quit,
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("{0} requires {1}")]
    Usage(&'static str, &'static str),
    #[error("invalid port {0:?}")]
    BadPort(String),
    #[error("unknown command {0:?}")]
    Unknown(String),
}

impl Command {
    /// Parse a line; `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((head, args)) = words.split_first() else {
            return Ok(None);
        };
        let cmd = match head.to_ascii_uppercase().as_str() {
            "CONNECT" => match args {
                [address, port] => Command::Connect {
                    address: address.to_string(),
                    port: port
                        .parse()
                        .map_err(|_| CommandError::BadPort(port.to_string()))?,
                },
                _ => return Err(CommandError::Usage("CONNECT", "2 parameters: <IP> <PORT>")),
            },
            "RETRIEVE" => match args {
                [name] => Command::Retrieve(name.to_string()),
                _ => return Err(CommandError::Usage("RETRIEVE", "a single parameter: <FILENAME>")),
            },
            "STORE" => match args {
                [path] => Command::Store(PathBuf::from(path)),
                _ => return Err(CommandError::Usage("STORE", "a single parameter: <PATH>")),
            },
            "DELETE" => match args {
                [name] => Command::Delete(name.to_string()),
                _ => return Err(CommandError::Usage("DELETE", "a single parameter: <FILENAME>")),
            },
            "LIST" => Command::List,
            "QUIT" => Command::Quit,
            "HELP" => Command::Help,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(cmd))
    }
}

const HELP: &str = "Please enter a valid command.
Valid commands are:
\tCONNECT <IP> <PORT>
\tLIST
\tRETRIEVE <FILENAME>
\tSTORE <PATH>
\tDELETE <FILENAME>
\tQUIT
\tHELP";

pub struct Console {
    client: PeerClient,
    download_dir: PathBuf,
}

impl Console {
    /// Retrieved files land in `download_dir`.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: PeerClient::new(),
            download_dir: download_dir.into(),
        }
    }

    pub fn client(&self) -> &PeerClient {
        &self.client
    }

    /// Execute one line and write the transcript to `out`.
    pub async fn run_line<W: Write>(&mut self, line: &str, out: &mut W) -> std::io::Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        writeln!(out, "> {}", line.trim())?;
        let cmd = match Command::parse(line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return Ok(()),
            Err(CommandError::Unknown(_)) => return writeln!(out, "{}", HELP),
            Err(e) => return writeln!(out, "{}", e),
        };
        match self.execute(cmd, out).await {
            Ok(()) => Ok(()),
            Err(ClientError::NotConnected) => writeln!(
                out,
                "A connection must be established first. Use the CONNECT <IP> <PORT> command."
            ),
            Err(e) => writeln!(out, "Error: {}", e),
        }
    }

    async fn execute<W: Write>(&mut self, cmd: Command, out: &mut W) -> Result<(), ClientError> {
        match cmd {
            Command::Connect { address, port } => {
                self.client.connect(&address, port).await?;
                writeln!(out, "Successfully connected to {}:{}", address, port)?;
            }
            Command::List => {
                let files = self.client.list().await?;
                if files.is_empty() {
                    writeln!(out, "The server does not contain any files.")?;
                } else {
                    writeln!(out, "Files:")?;
                    let rows: Vec<[&str; 2]> =
                        files.iter().map(|(n, s)| [n.as_str(), s.as_str()]).collect();
                    column_print(out, &rows)?;
                }
            }
            Command::Retrieve(name) => {
                let bytes = self.client.retrieve(&name).await?;
                let dest = Catalog::new(
                    &self.download_dir,
                    CatalogPolicy {
                        exclude_extensions: Vec::new(),
                        exclude_hidden: false,
                    },
                );
                dest.write(&name, &bytes)
                    .await
                    .map_err(|e| ClientError::Protocol(e.to_string()))?;
                writeln!(
                    out,
                    "Successfully transferred {} bytes from remote into {}",
                    bytes.len(),
                    name
                )?;
            }
            Command::Store(path) => {
                let len = tokio::fs::metadata(&path).await.map(|m| m.len()).ok();
                let name = self.client.store(&path).await?;
                writeln!(
                    out,
                    "Successfully transferred {} bytes to remote as {}",
                    len.unwrap_or_default(),
                    name
                )?;
            }
            Command::Delete(name) => {
                self.client.delete(&name).await?;
                writeln!(out, "File deleted")?;
            }
            Command::Quit => {
                if self.client.is_connected() {
                    self.client.quit().await?;
                    writeln!(out, "Disconnected")?;
                }
            }
            Command::Help => writeln!(out, "{}", HELP)?,
        }
        Ok(())
    }
}

fn column_print<W: Write>(out: &mut W, rows: &[[&str; 2]]) -> std::io::Result<()> {
    let width = rows
        .iter()
        .flat_map(|r| r.iter())
        .map(|w| w.chars().count())
        .max()
        .unwrap_or(0)
        + 2;
    for row in rows {
        let line: String = row.iter().map(|w| format!("{:<width$}", w, width = width)).collect();
        writeln!(out, "\t{}", line)?;
    }
    Ok(())
}
