//! Chat message model and wire record.
//!
//! Defines the single record type exchanged between nodes and the
//! queue-local envelope that carries message provenance.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Kind of chat message carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// A node announcing itself after a connection is established.
    Connect,
    /// An ordinary chat line.
    Send,
    /// A node announcing that its listener is going away.
    Disconnect,
}

impl MessageType {
    /// Wire literal for this type, for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Send => "send",
            MessageType::Disconnect => "disconnect",
        }
    }
}

/// One chat record as transmitted between nodes.
///
/// `address` identifies the peer a message arrived *from* and is empty for
/// locally-originated messages. Every receiving node overwrites it with its
/// own view of the sending connection before queueing, so the field is only
/// ever meaningful within one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub address: String,
    pub user: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub kind: MessageType,
}

impl Message {
    /// Build a locally-originated message stamped with the current time.
    pub fn local(user: impl Into<String>, text: impl Into<String>, kind: MessageType) -> Self {
        Self {
            address: String::new(),
            user: user.into(),
            text: text.into(),
            timestamp: Utc::now().timestamp(),
            kind,
        }
    }
}

/// Queue entry pairing a message with its process-local provenance.
///
/// `internal` marks messages produced by this node's own API calls. It lives
/// here rather than on [`Message`] so it can never appear on the wire; the
/// dispatcher uses it to keep a node's own output away from its observer.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: Message,
    pub internal: bool,
}

impl Envelope {
    /// Wrap a message produced by a local API call.
    pub fn local(message: Message) -> Self {
        Self {
            message,
            internal: true,
        }
    }

    /// Wrap a message decoded from the stream of the peer at `peer_addr`.
    pub fn inbound(mut message: Message, peer_addr: &str) -> Self {
        message.address = peer_addr.to_string();
        Self {
            message,
            internal: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_roundtrip() {
        let msg = Message {
            address: "127.0.0.1:4000".to_string(),
            user: "alice".to_string(),
            text: "hello".to_string(),
            timestamp: 1_700_000_000,
            kind: MessageType::Send,
        };

        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_wire_fields() {
        let msg = Message::local("bob", "hi", MessageType::Connect);
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["address", "text", "timestamp", "type", "user"]);
        assert_eq!(obj["type"], "connect");
        assert_eq!(obj["address"], "");
    }

    #[test]
    fn test_type_literals() {
        assert_eq!(
            serde_json::to_string(&MessageType::Disconnect).unwrap(),
            "\"disconnect\""
        );
        let kind: MessageType = serde_json::from_str("\"send\"").unwrap();
        assert_eq!(kind, MessageType::Send);
    }

    #[test]
    fn test_envelope_provenance() {
        let local = Envelope::local(Message::local("alice", "hi", MessageType::Send));
        assert!(local.internal);
        assert!(local.message.address.is_empty());

        let wire = Message {
            address: "ignored".to_string(),
            user: "bob".to_string(),
            text: "hello".to_string(),
            timestamp: 0,
            kind: MessageType::Send,
        };
        let inbound = Envelope::inbound(wire, "127.0.0.1:9000");
        assert!(!inbound.internal);
        assert_eq!(inbound.message.address, "127.0.0.1:9000");
    }
}
