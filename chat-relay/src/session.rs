use std::{
    fmt, io,
    net::SocketAddr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};
use tracing::debug;

use crate::protocol::write_message_within;

/// Write side of a client connection.
pub type Transport = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A connected client that finished the name handshake.
///
/// Reads stay with the connection handler; the write half lives here behind
/// an async mutex so any task can relay to it, one whole payload at a time.
pub struct Session {
    id: SessionId,
    name: String,
    peer: Option<SocketAddr>,
    writer: Mutex<Transport>,
    alive: AtomicBool,
}

impl Session {
    pub fn new<W>(id: SessionId, name: String, peer: Option<SocketAddr>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            name,
            peer,
            writer: Mutex::new(Box::new(writer)),
            alive: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_disconnected(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Writes one payload to this client.
    pub async fn send(&self, payload: &[u8], write_timeout: Option<Duration>) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        write_message_within(&mut *writer, payload, write_timeout).await
    }

    /// Shuts down the write half unless a delivery is still writing to it.
    ///
    /// A busy writer is left alone; the transport closes when the last
    /// handle to this session is dropped.
    pub async fn close(&self) {
        let Ok(mut writer) = self.writer.try_lock() else {
            debug!(session = %self.id, "writer busy, skipping shutdown");
            return;
        };
        if let Err(error) = writer.shutdown().await {
            debug!(session = %self.id, ?error, "failed to shut down writer");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
