//! SharePod wire protocol: request/response shapes for the Directory Server and the Peer File Service.
//!
//! Every message is a JSON object. Requests carry a `method` field, matched exactly but
//! ASCII case-insensitively. Failures are reported as `{"error": "..."}`.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Default Directory Server port.
pub const DIRECTORY_PORT: u16 = 12345;
/// Default Peer File Service port.
pub const FILE_SERVICE_PORT: u16 = 1234;

pub const METHOD_FIELD: &str = "method";
pub const ERROR_FIELD: &str = "error";
pub const SUCCESS_FIELD: &str = "success";

/// File Service reply for a missing file.
pub const FILE_DOES_NOT_EXIST: &str = "file does not exist";
/// File Service reply for a method it does not implement.
pub const UNSUPPORTED_COMMAND: &str = "Unsupported command";
pub const FILE_REMOVED: &str = "file removed";

/// Methods accepted by the Directory Server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryMethod {
    Connect,
    List,
    Keyword,
}

impl DirectoryMethod {
    pub const ALL: [DirectoryMethod; 3] = [Self::Connect, Self::List, Self::Keyword];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::List => "LIST",
            Self::Keyword => "KEYWORD",
        }
    }
}

/// Methods accepted by the Peer File Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMethod {
    List,
    Retrieve,
    Store,
    Delete,
    Quit,
}

impl FileMethod {
    pub const ALL: [FileMethod; 5] = [
        Self::List,
        Self::Retrieve,
        Self::Store,
        Self::Delete,
        Self::Quit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "LIST",
            Self::Retrieve => "RETRIEVE",
            Self::Store => "STORE",
            Self::Delete => "DELETE",
            Self::Quit => "QUIT",
        }
    }
}

macro_rules! method_impls {
    ($ty:ty) => {
        impl FromStr for $ty {
            type Err = ProtocolError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty>::ALL
                    .iter()
                    .copied()
                    .find(|m| m.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| ProtocolError::UnknownMethod {
                        method: s.to_string(),
                        valid: method_set(&<$ty>::ALL.map(|m| m.as_str())),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

method_impls!(DirectoryMethod);
method_impls!(FileMethod);

fn method_set(names: &[&str]) -> String {
    names.join(", ")
}

/// Request is not something the receiver can act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: missing method field")]
    MissingMethod,
    #[error("malformed request: expected a JSON object")]
    NotAnObject,
    #[error("unknown method {method:?}; valid methods are {valid}")]
    UnknownMethod { method: String, valid: String },
    #[error("missing or invalid field: {0}")]
    InvalidField(String),
}

/// One advertised file in a CONNECT catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub filename: String,
}

/// CONNECT body: who the peer is and where its File Service listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub username: String,
    /// `address:port` of the peer's File Service.
    pub hostname: String,
    pub speed: String,
    pub files: Vec<FileDescriptor>,
}

/// One row of a Directory LIST or KEYWORD result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub filename: String,
    pub hostname: String,
    pub speed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct KeywordBody {
    keyword: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct FilenameBody {
    filename: String,
}

/// Requests understood by the Directory Server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
pub enum DirectoryRequest {
    Connect(Announcement),
    List,
    Keyword { keyword: String },
}

impl DirectoryRequest {
    pub fn method(&self) -> DirectoryMethod {
        match self {
            Self::Connect(_) => DirectoryMethod::Connect,
            Self::List => DirectoryMethod::List,
            Self::Keyword { .. } => DirectoryMethod::Keyword,
        }
    }

    pub fn decode(msg: &Value) -> Result<Self, ProtocolError> {
        let method: DirectoryMethod = method_of(msg)?.parse()?;
        Ok(match method {
            DirectoryMethod::Connect => Self::Connect(body(msg)?),
            DirectoryMethod::List => Self::List,
            DirectoryMethod::Keyword => {
                let KeywordBody { keyword } = body(msg)?;
                Self::Keyword { keyword }
            }
        })
    }
}

/// Requests understood by the Peer File Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "UPPERCASE")]
pub enum FileRequest {
    List,
    Retrieve { filename: String },
    /// `content` is base64.
    Store { filename: String, content: String },
    Delete { filename: String },
    Quit,
}

impl FileRequest {
    pub fn method(&self) -> FileMethod {
        match self {
            Self::List => FileMethod::List,
            Self::Retrieve { .. } => FileMethod::Retrieve,
            Self::Store { .. } => FileMethod::Store,
            Self::Delete { .. } => FileMethod::Delete,
            Self::Quit => FileMethod::Quit,
        }
    }

    pub fn decode(msg: &Value) -> Result<Self, ProtocolError> {
        let method: FileMethod = method_of(msg)?.parse()?;
        Ok(match method {
            FileMethod::List => Self::List,
            FileMethod::Retrieve => {
                let FilenameBody { filename } = body(msg)?;
                Self::Retrieve { filename }
            }
            FileMethod::Store => {
                let FileContent { filename, content } = body(msg)?;
                Self::Store { filename, content }
            }
            FileMethod::Delete => {
                let FilenameBody { filename } = body(msg)?;
                Self::Delete { filename }
            }
            FileMethod::Quit => Self::Quit,
        })
    }
}

/// File Service LIST reply: `[filename, human_size]` pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListing {
    pub files: Vec<(String, String)>,
}

/// RETRIEVE reply and STORE body. `content` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub filename: String,
    pub content: String,
}

/// Read the `method` field of a request.
pub fn method_of(msg: &Value) -> Result<&str, ProtocolError> {
    let obj = msg.as_object().ok_or(ProtocolError::NotAnObject)?;
    obj.get(METHOD_FIELD)
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .ok_or(ProtocolError::MissingMethod)
}

fn body<T: DeserializeOwned>(msg: &Value) -> Result<T, ProtocolError> {
    T::deserialize(msg).map_err(|e| ProtocolError::InvalidField(e.to_string()))
}

/// `{"error": message}`
pub fn error_response(message: impl fmt::Display) -> Value {
    json!({ ERROR_FIELD: message.to_string() })
}

/// `{"success": message}`
pub fn success_response(message: impl Into<Value>) -> Value {
    json!({ SUCCESS_FIELD: message.into() })
}

/// The `error` field of a response, if the response is a failure.
pub fn error_of(msg: &Value) -> Option<&str> {
    msg.get(ERROR_FIELD).and_then(Value::as_str)
}

/// Split an advertised `address:port` hostname. IPv6 addresses must be bracketed (`[::1]:80`).
pub fn parse_host_port(hostname: &str) -> Option<(String, u16)> {
    let (host, port) = hostname.trim().rsplit_once(':')?;
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']')?,
        None if host.contains(':') || host.contains(']') => return None,
        None => host,
    };
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}
