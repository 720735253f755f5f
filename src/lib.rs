//! Mesh-Chat: an ad-hoc peer-to-peer chat node in Rust
//!
//! This crate implements a small flood-broadcast chat mesh:
//! - every node is both TCP server and client
//! - self-describing JSON records on the wire, newline-terminated on write
//! - messages relay to every peer except the one they arrived from
//! - connect and disconnect announcements ride the same channel as chat
//!
//! # Example
//!
//! ```rust
//! use mesh_chat::network::{MessageType, Node};
//!
//! # async fn demo() -> Result<(), mesh_chat::network::NodeError> {
//! // Observe the mesh, then join it.
//! let mut node = Node::new("127.0.0.1:0", "alice")
//!     .on_message(|message| println!("{}> {}", message.user, message.text));
//! node.start().await?;
//!
//! node.dial("127.0.0.1:3000").await?;
//! node.send_message("hello, mesh", MessageType::Send).await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod network;

// Re-export commonly used types
pub use network::{Message, MessageType, Node, NodeError};
