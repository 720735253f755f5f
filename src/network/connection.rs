//! Per-connection lifecycle: registration, announcement, read loop, cleanup.

use std::sync::Arc;

use futures::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use crate::network::codec::MessageCodec;
use crate::network::message::{Envelope, Message, MessageType};
use crate::network::peer::{Peer, PeerRegistry};

/// Drive one TCP connection from registration to teardown.
///
/// The write half is registered in `registry` under the remote address and
/// the read half is pumped into `queue` until the stream ends. The registry
/// entry is removed on every exit path, so a dead connection never leaves a
/// stale peer behind.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    outbound: bool,
    username: String,
    registry: Arc<PeerRegistry>,
    queue: mpsc::Sender<Envelope>,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            log::warn!("dropping connection with no peer address: {}", e);
            return;
        }
    };

    let (reader, writer) = stream.into_split();
    registry.put(
        peer_addr.clone(),
        Peer::new(peer_addr.clone(), writer, outbound),
    );

    read_loop(reader, outbound, &username, &peer_addr, &queue).await;

    registry.remove(&peer_addr);
    log::info!("connection with {} closed", peer_addr);
}

/// Pump decoded records from `reader` into the local queue.
///
/// A connection someone opened to us is announced first; the announcement is
/// queued like a locally typed message, so it reaches every current peer.
/// Malformed records are skipped, read errors and EOF end the loop.
async fn read_loop(
    reader: OwnedReadHalf,
    outbound: bool,
    username: &str,
    peer_addr: &str,
    queue: &mpsc::Sender<Envelope>,
) {
    if !outbound {
        let hello = Envelope::local(Message::local(username, "connect", MessageType::Connect));
        if queue.send(hello).await.is_err() {
            log::warn!("message queue closed before {} was announced", peer_addr);
            return;
        }
    }

    let mut frames = FramedRead::new(reader, MessageCodec);
    while let Some(item) = frames.next().await {
        match item {
            Ok(Ok(message)) => {
                log::debug!("{} record from {}", message.kind.as_str(), peer_addr);
                let envelope = Envelope::inbound(message, peer_addr);
                if queue.send(envelope).await.is_err() {
                    log::warn!("message queue closed, dropping connection with {}", peer_addr);
                    return;
                }
            }
            Ok(Err(record)) => {
                log::warn!("skipping malformed record from {}: {}", peer_addr, record);
            }
            Err(e) => {
                log::warn!("read error on connection with {}: {}", peer_addr, e);
                return;
            }
        }
    }
    log::debug!("peer {} closed the connection", peer_addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    async fn accepted_pair() -> (TcpStream, TcpStream, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let client_addr = client.local_addr().unwrap().to_string();
        let (server, _) = listener.accept().await.unwrap();
        (client, server, client_addr)
    }

    #[tokio::test]
    async fn test_inbound_connection_is_announced() {
        let (_client, server, _) = accepted_pair().await;
        let registry = Arc::new(PeerRegistry::new());
        let (tx, mut rx) = mpsc::channel(16);

        tokio::spawn(handle_connection(
            server,
            false,
            "alice".to_string(),
            registry.clone(),
            tx,
        ));

        let hello = rx.recv().await.unwrap();
        assert!(hello.internal);
        assert_eq!(hello.message.kind, MessageType::Connect);
        assert_eq!(hello.message.user, "alice");
        assert_eq!(hello.message.text, "connect");
        assert_eq!(hello.message.address, "");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_outbound_connection_is_silent_and_stamps_records() {
        let (mut client, server, client_addr) = accepted_pair().await;
        let registry = Arc::new(PeerRegistry::new());
        let (tx, mut rx) = mpsc::channel(16);

        tokio::spawn(handle_connection(
            server,
            true,
            "alice".to_string(),
            registry.clone(),
            tx,
        ));

        client
            .write_all(b"{\"address\":\"\",\"user\":\"bob\",\"text\":\"hi\",\"timestamp\":7,\"type\":\"send\"}\n")
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert!(!envelope.internal);
        assert_eq!(envelope.message.text, "hi");
        assert_eq!(envelope.message.address, client_addr);
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_end_connection() {
        let (mut client, server, _) = accepted_pair().await;
        let registry = Arc::new(PeerRegistry::new());
        let (tx, mut rx) = mpsc::channel(16);

        tokio::spawn(handle_connection(
            server,
            true,
            "alice".to_string(),
            registry.clone(),
            tx,
        ));

        client.write_all(b"{\"bogus\": true}").await.unwrap();
        client
            .write_all(b"{\"address\":\"\",\"user\":\"bob\",\"text\":\"after\",\"timestamp\":7,\"type\":\"send\"}\n")
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.message.text, "after");
    }

    #[tokio::test]
    async fn test_peer_removed_when_stream_ends() {
        let (client, server, client_addr) = accepted_pair().await;
        let registry = Arc::new(PeerRegistry::new());
        let (tx, _rx) = mpsc::channel(16);

        let task = tokio::spawn(handle_connection(
            server,
            true,
            "alice".to_string(),
            registry.clone(),
            tx,
        ));

        // Give the task time to register before we kill the stream.
        while !registry.contains(&client_addr) {
            tokio::task::yield_now().await;
        }
        drop(client);

        task.await.unwrap();
        assert!(registry.is_empty());
    }
}
