// Peer connections and registry

use crate::network::{Message, NetworkError, MAX_FRAME_LEN};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::timeout;

/// Read one frame: everything up to end-of-stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, NetworkError> {
    let mut frame = Vec::new();
    reader
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_to_end(&mut frame)
        .await?;

    if frame.len() > MAX_FRAME_LEN {
        return Err(NetworkError::Protocol(format!(
            "frame exceeds {} bytes",
            MAX_FRAME_LEN
        )));
    }
    Ok(frame)
}

/// Write one frame and half-close so the reader sees end-of-stream
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<(), NetworkError> {
    writer.write_all(&message.encode()?).await?;
    writer.shutdown().await?;
    Ok(())
}

async fn connect(addr: &str, connect_timeout: Duration) -> Result<TcpStream, NetworkError> {
    timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| NetworkError::Timeout(format!("connecting to {}", addr)))?
        .map_err(NetworkError::from)
}

/// Dial `addr`, send one message and close
pub async fn send_message(addr: &str, message: &Message, connect_timeout: Duration) -> Result<(), NetworkError> {
    let mut stream = connect(addr, connect_timeout).await?;
    write_frame(&mut stream, message).await
}

/// Dial `addr`, send one message and read the single reply
pub async fn request(addr: &str, message: &Message, connect_timeout: Duration) -> Result<Message, NetworkError> {
    let mut stream = connect(addr, connect_timeout).await?;
    write_frame(&mut stream, message).await?;
    let frame = read_frame(&mut stream).await?;
    Message::decode(&frame)
}

/// Known peer addresses, kept in memory only
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<BTreeSet<String>>,
}

impl PeerRegistry {
    pub fn new<I: IntoIterator<Item = String>>(initial: I) -> Self {
        Self {
            peers: RwLock::new(initial.into_iter().collect()),
        }
    }

    /// Returns true if the address was new
    pub async fn add(&self, addr: &str) -> bool {
        self.peers.write().await.insert(addr.to_string())
    }

    pub async fn remove(&self, addr: &str) -> bool {
        self.peers.write().await.remove(addr)
    }

    pub async fn contains(&self, addr: &str) -> bool {
        self.peers.read().await.contains(addr)
    }

    /// Snapshot; the lock is released before the caller does any I/O
    pub async fn list(&self) -> Vec<String> {
        self.peers.read().await.iter().cloned().collect()
    }

    pub async fn first(&self) -> Option<String> {
        self.peers.read().await.iter().next().cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}
