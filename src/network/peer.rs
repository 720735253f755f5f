//! Peer connections and the shared peer registry.
//!
//! A [`Peer`] owns the write half of one TCP connection plus its outbound
//! serialization; the read half stays with the connection's lifecycle task.
//! The [`PeerRegistry`] maps remote addresses to peers and supports
//! concurrent insert, remove and iteration with no caller-side locking.

use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio_util::codec::Encoder;

use crate::network::codec::MessageCodec;
use crate::network::message::Message;

/// One connected peer.
#[derive(Clone)]
pub struct Peer {
    addr: String,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    outbound: bool,
}

impl Peer {
    /// Wrap the write half of an established connection. Nothing is sent.
    pub fn new(addr: impl Into<String>, writer: OwnedWriteHalf, outbound: bool) -> Self {
        Self {
            addr: addr.into(),
            writer: Arc::new(Mutex::new(writer)),
            outbound,
        }
    }

    /// Remote identifier of this peer.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether this node initiated the connection.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Serialize one record and write it out. An error means the caller must
    /// treat the connection as dead.
    pub async fn send(&self, message: &Message) -> std::io::Result<()> {
        let mut buf = BytesMut::new();
        MessageCodec.encode(message, &mut buf)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        writer.flush().await
    }
}

/// Registry of currently connected peers, keyed by remote address.
///
/// Backed by a sharded concurrent map, so inserts, removals and iteration
/// from different tasks never serialize on one global lock. Iteration sees a
/// weakly consistent view of concurrent changes.
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<String, Peer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
        }
    }

    /// Insert or replace the peer stored under `addr`.
    ///
    /// A replaced entry is dropped without its connection being shut down;
    /// the old connection lingers until its own read loop ends.
    pub fn put(&self, addr: impl Into<String>, peer: Peer) {
        let addr = addr.into();
        log::info!("registered peer {} (outbound: {})", addr, peer.is_outbound());
        if self.peers.insert(addr.clone(), peer).is_some() {
            log::warn!("replaced existing peer entry for {}", addr);
        }
    }

    /// Remove and return the peer stored under `addr`.
    pub fn remove(&self, addr: &str) -> Option<Peer> {
        let removed = self.peers.remove(addr).map(|(_, peer)| peer);
        if removed.is_some() {
            log::info!("removed peer {}", addr);
        }
        removed
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.contains_key(addr)
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of the current peers. Entries inserted or removed while the
    /// snapshot is in use may or may not be reflected.
    pub fn snapshot(&self) -> Vec<Peer> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Send `message` to every registered peer except the one at `origin`.
    ///
    /// Per-peer send failures are logged and do not stop delivery to the
    /// remaining peers. A failed peer is not removed here; its own
    /// connection task owns cleanup.
    pub async fn broadcast_except(&self, message: &Message, origin: &str) {
        for peer in self.snapshot() {
            if peer.addr() == origin {
                continue;
            }
            if let Err(e) = peer.send(message).await {
                log::error!("failed to send message to {}: {}", peer.addr(), e);
            }
        }
    }
}
