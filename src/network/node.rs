//! The chat node: listener, dialer, message queue and dispatcher.
//!
//! A [`Node`] owns one TCP listener and a set of peer connections. Every
//! message, whether typed locally or received from a peer, passes through
//! one bounded queue and is relayed by a single dispatcher task to every
//! peer except the one it arrived from.

use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::network::connection::handle_connection;
use crate::network::message::{Envelope, Message, MessageType};
use crate::network::peer::PeerRegistry;

/// Capacity of the node's message queue. Producers wait for room when the
/// queue is full; records are never dropped.
pub const MESSAGE_QUEUE_CAPACITY: usize = 1024;

/// Handler the dispatcher invokes for every message that arrived from a
/// peer, before the message is relayed onward.
pub type MessageHandler = Box<dyn Fn(Message) + Send + 'static>;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        source: std::io::Error,
    },

    #[error("node was already started")]
    AlreadyStarted,

    #[error("message queue is closed")]
    QueueClosed,
}

/// A single participant in the chat mesh.
pub struct Node {
    addr: String,
    username: String,
    peers: Arc<PeerRegistry>,
    queue_tx: mpsc::Sender<Envelope>,
    queue_rx: Option<mpsc::Receiver<Envelope>>,
    on_message: Option<MessageHandler>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    local_addr: Option<String>,
}

impl Node {
    /// Create a node that listens on `addr` once started and signs its
    /// messages as `username`.
    pub fn new(addr: impl Into<String>, username: impl Into<String>) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(MESSAGE_QUEUE_CAPACITY);
        Self {
            addr: addr.into(),
            username: username.into(),
            peers: Arc::new(PeerRegistry::new()),
            queue_tx,
            queue_rx: Some(queue_rx),
            on_message: None,
            shutdown_tx: None,
            local_addr: None,
        }
    }

    /// Install the handler called for every message received from the
    /// network. Locally authored messages are never passed to it. Install
    /// before [`Node::start`]; the dispatcher takes ownership on start.
    pub fn on_message<F>(mut self, handler: F) -> Self
    where
        F: Fn(Message) + Send + 'static,
    {
        self.on_message = Some(Box::new(handler));
        self
    }

    /// Bind the listener and spawn the accept and dispatch loops.
    ///
    /// Returns immediately once both tasks are running. Starting a node a
    /// second time is an error; a failed bind leaves the node startable.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        let queue_rx = match self.queue_rx.take() {
            Some(rx) => rx,
            None => return Err(NodeError::AlreadyStarted),
        };

        let listener = match TcpListener::bind(&self.addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.queue_rx = Some(queue_rx);
                return Err(NodeError::Bind {
                    addr: self.addr.clone(),
                    source,
                });
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(source) => {
                self.queue_rx = Some(queue_rx);
                return Err(NodeError::Bind {
                    addr: self.addr.clone(),
                    source,
                });
            }
        };
        self.local_addr = Some(local_addr.to_string());
        log::info!("node of {} listening on {}", self.username, local_addr);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            self.username.clone(),
            self.peers.clone(),
            self.queue_tx.clone(),
        ));
        tokio::spawn(dispatch_loop(
            queue_rx,
            self.peers.clone(),
            self.on_message.take(),
        ));

        Ok(())
    }

    /// Connect to the node at `addr` and start relaying through it.
    ///
    /// Dialing announces nothing; the accepting side queues the greeting.
    pub async fn dial(&self, addr: &str) -> Result<(), NodeError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| NodeError::Dial {
                addr: addr.to_string(),
                source,
            })?;
        log::info!("connected to {}", addr);

        tokio::spawn(handle_connection(
            stream,
            true,
            self.username.clone(),
            self.peers.clone(),
            self.queue_tx.clone(),
        ));
        Ok(())
    }

    /// Queue a message authored by this node for delivery to every peer.
    ///
    /// The local handler is not invoked for it. Waits when the queue is
    /// full.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        kind: MessageType,
    ) -> Result<(), NodeError> {
        let message = Message::local(&self.username, text, kind);
        self.queue_tx
            .send(Envelope::local(message))
            .await
            .map_err(|_| NodeError::QueueClosed)
    }

    /// Announce departure and stop accepting new connections.
    ///
    /// Existing connections and the dispatcher keep running: the farewell
    /// and anything still queued reach every peer, and traffic from
    /// connected peers is still relayed. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), NodeError> {
        let shutdown_tx = match self.shutdown_tx.take() {
            Some(tx) => tx,
            None => return Ok(()),
        };

        self.send_message("disconnect", MessageType::Disconnect)
            .await?;
        if shutdown_tx.send(()).await.is_err() {
            log::debug!("accept loop already stopped");
        }
        log::info!("node of {} closed its listener", self.username);
        Ok(())
    }

    /// The address peers can reach this node at: the bound listener address
    /// once started, the configured one before that.
    pub fn addr(&self) -> &str {
        self.local_addr.as_deref().unwrap_or(&self.addr)
    }

    /// Number of live peer connections.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

/// Accept connections until the shutdown signal arrives, spawning one
/// lifecycle task per connection. Dropping out of this loop drops the
/// listener, which refuses new connections without touching existing ones.
async fn accept_loop(
    listener: TcpListener,
    mut shutdown_rx: mpsc::Receiver<()>,
    username: String,
    peers: Arc<PeerRegistry>,
    queue_tx: mpsc::Sender<Envelope>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                log::debug!("accept loop shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    log::info!("accepted connection from {}", addr);
                    tokio::spawn(handle_connection(
                        stream,
                        false,
                        username.clone(),
                        peers.clone(),
                        queue_tx.clone(),
                    ));
                }
                Err(e) => log::error!("failed to accept connection: {}", e),
            },
        }
    }
}

/// Drain the message queue one envelope at a time: hand messages from the
/// network to the local handler, then relay to every peer except the one
/// the message arrived from. Locally authored messages carry an empty
/// origin, which matches no peer, so they go to everyone.
async fn dispatch_loop(
    mut queue_rx: mpsc::Receiver<Envelope>,
    peers: Arc<PeerRegistry>,
    on_message: Option<MessageHandler>,
) {
    while let Some(envelope) = queue_rx.recv().await {
        if !envelope.internal {
            if let Some(handler) = &on_message {
                handler(envelope.message.clone());
            }
        }
        peers
            .broadcast_except(&envelope.message, &envelope.message.address)
            .await;
    }
    log::debug!("dispatch loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut node = Node::new("127.0.0.1:0", "alice");
        node.start().await.unwrap();
        assert!(matches!(node.start().await, Err(NodeError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_addr_reflects_bound_listener() {
        let mut node = Node::new("127.0.0.1:0", "alice");
        assert_eq!(node.addr(), "127.0.0.1:0");

        node.start().await.unwrap();
        let addr: std::net::SocketAddr = node.addr().parse().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_node_startable() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let mut node = Node::new(&addr, "alice");
        assert!(matches!(node.start().await, Err(NodeError::Bind { .. })));

        drop(taken);
        node.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let mut node = Node::new("127.0.0.1:0", "alice");
        node.start().await.unwrap();
        node.close().await.unwrap();
        node.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_before_start_is_noop() {
        let mut node = Node::new("127.0.0.1:0", "alice");
        node.close().await.unwrap();
    }
}
