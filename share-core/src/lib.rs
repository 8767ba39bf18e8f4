//! SharePod protocol reference implementation.
//! Framing, message types, the local file catalog and the outbound peer client.

pub mod catalog;
pub mod channel;
pub mod client;
pub mod protocol;
pub mod size;
pub mod wire;

pub use catalog::{Catalog, CatalogEntry, CatalogError, CatalogPolicy};
pub use channel::{Channel, ChannelError};
pub use client::{ClientError, PeerClient};
pub use protocol::{
    Announcement, DirectoryMethod, DirectoryRequest, FileDescriptor, FileMethod, FileRequest,
    ListingEntry, ProtocolError, DIRECTORY_PORT, FILE_SERVICE_PORT,
};
pub use size::human_size;
pub use wire::{encode_frame, FrameDecodeError, FrameEncodeError};
