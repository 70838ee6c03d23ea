//! Unframed chat wire protocol.
//!
//! The relay never adds delimiters or length prefixes: whatever a single
//! read call returns is one message, and every server message is written as
//! raw bytes.

use std::{io, time::Duration};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Sent to every connection as soon as it is accepted.
pub const NAME_PROMPT: &str = "Welcome to the chat room, Please type your name to continue";

pub const DEFAULT_READ_BUFFER: usize = 1024;

pub fn welcome(name: &str) -> String {
    format!("Welcome {name}. Good to see you :)")
}

pub fn joined(name: &str) -> String {
    format!("{name} has recently joined us")
}

/// Prefixes a relayed message with the sender's name.
pub fn relayed(name: &str, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(name.len() + 1 + body.len());
    payload.extend_from_slice(name.as_bytes());
    payload.push(b':');
    payload.extend_from_slice(body);
    payload
}

/// Reads one message into `buf`.
///
/// Returns `Ok(None)` when the peer closed its side (zero-length read).
/// With an idle timeout set, a read that waits longer than that fails with
/// [`io::ErrorKind::TimedOut`].
pub async fn read_message<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let read = match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, reader.read(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "idle timeout elapsed"))??,
        None => reader.read(buf).await?,
    };

    if read == 0 {
        return Ok(None);
    }
    Ok(Some(buf[..read].to_vec()))
}

pub async fn write_message<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Like [`write_message`], failing with [`io::ErrorKind::TimedOut`] when the
/// write takes longer than `write_timeout`.
pub async fn write_message_within<W>(
    writer: &mut W,
    payload: &[u8],
    write_timeout: Option<Duration>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match write_timeout {
        Some(limit) => tokio::time::timeout(limit, write_message(writer, payload))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write timeout elapsed"))?,
        None => write_message(writer, payload).await,
    }
}
