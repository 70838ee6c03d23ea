//! Per-connection state machine: awaiting name, active, disconnected.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::{debug, info};

use crate::{
    broadcast::Broadcaster,
    protocol::{
        self, DEFAULT_READ_BUFFER, NAME_PROMPT, read_message, write_message, write_message_within,
    },
    registry::Registration,
};

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Upper bound for one message; one read fills at most this many bytes.
    pub read_buffer: usize,
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_buffer: DEFAULT_READ_BUFFER,
            idle_timeout: None,
        }
    }
}

#[derive(Debug)]
enum Disconnect {
    Closed,
    IdleTimeout,
    ReadError(io::Error),
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: Broadcaster,
    settings: SessionSettings,
) -> Result<()> {
    let (reader, writer) = stream.into_split();
    serve_session(reader, writer, Some(peer), &broadcaster, settings).await
}

/// Drives one client from the name prompt until it disconnects.
///
/// Returns an error only when the client goes away before it is registered.
pub async fn serve_session<R, W>(
    mut reader: R,
    mut writer: W,
    peer: Option<SocketAddr>,
    broadcaster: &Broadcaster,
    settings: SessionSettings,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    write_message(&mut writer, NAME_PROMPT.as_bytes())
        .await
        .context("failed to send name prompt")?;

    let mut buf = vec![0u8; settings.read_buffer.max(1)];
    let name = await_name(&mut reader, &mut buf, settings.idle_timeout).await?;
    let registration = join(broadcaster, writer, name, peer).await?;

    let reason = relay_messages(&mut reader, &mut buf, &registration, broadcaster, settings).await;

    // Unregister before touching the writer: a stalled delivery may hold it.
    let session = Arc::clone(registration.session());
    drop(registration);

    let peer = session.peer();
    match &reason {
        Disconnect::ReadError(err) => {
            info!(?peer, name = %session.name(), error = %err, "client dropped")
        }
        _ => info!(?peer, name = %session.name(), ?reason, "client disconnected"),
    }
    session.close().await;

    Ok(())
}

async fn await_name<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    // An empty read cannot be told apart from an empty name, so it is one.
    let raw = read_message(reader, buf, idle_timeout)
        .await
        .context("failed to read display name")?
        .unwrap_or_default();
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

async fn join<W>(
    broadcaster: &Broadcaster,
    mut writer: W,
    name: String,
    peer: Option<SocketAddr>,
) -> Result<Registration>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    // Welcome first, so nothing relayed can reach the client ahead of it.
    write_message_within(
        &mut writer,
        protocol::welcome(&name).as_bytes(),
        broadcaster.write_timeout(),
    )
    .await
    .context("failed to send welcome")?;

    let (registration, earlier) = broadcaster.registry().register(name, peer, writer);
    let session = registration.session();
    info!(?peer, session = %session.id(), name = %session.name(), "client joined");

    let announcement = protocol::joined(session.name());
    broadcaster
        .deliver_to(&earlier, announcement.as_bytes(), None)
        .await;

    Ok(registration)
}

async fn relay_messages<R>(
    reader: &mut R,
    buf: &mut [u8],
    registration: &Registration,
    broadcaster: &Broadcaster,
    settings: SessionSettings,
) -> Disconnect
where
    R: AsyncRead + Unpin,
{
    let session = registration.session();

    loop {
        match read_message(reader, buf, settings.idle_timeout).await {
            Ok(Some(body)) => {
                let payload = protocol::relayed(session.name(), &body);
                let delivery = broadcaster.deliver(&payload, Some(session.id())).await;
                debug!(
                    name = %session.name(),
                    bytes = body.len(),
                    delivered = delivery.delivered,
                    failed = delivery.failed,
                    "relayed message"
                );
            }
            Ok(None) => return Disconnect::Closed,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => return Disconnect::IdleTimeout,
            Err(err) => return Disconnect::ReadError(err),
        }
    }
}
