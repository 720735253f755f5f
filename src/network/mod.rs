//! P2P networking module
//!
//! Everything a node needs to take part in the chat mesh.
//!
//! # Features
//! - TCP-based peer connections
//! - Newline-delimited JSON wire records
//! - Flood broadcast with origin exclusion
//! - Connect and disconnect announcements
//! - Concurrent peer registry

pub mod codec;
pub mod message;
pub mod node;
pub mod peer;

mod connection;

pub use codec::{MessageCodec, RecordError, MAX_RECORD_SIZE};
pub use message::{Envelope, Message, MessageType};
pub use node::{MessageHandler, Node, NodeError, MESSAGE_QUEUE_CAPACITY};
pub use peer::{Peer, PeerRegistry};
