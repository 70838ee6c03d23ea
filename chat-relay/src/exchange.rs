//! One-shot request/response over plain TCP.
//!
//! The responder serves connections strictly one after another: read one
//! message, answer it, close. The requester sends messages over a single
//! connection and prints one reply per message.

use std::{future::Future, net::SocketAddr};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    cli::{RequestArgs, RespondArgs},
    protocol::{read_message, write_message},
};

pub const EXCHANGE_BUFFER: usize = 8192;

const STOP_WORD: &str = "bye";
const HTTP_TERMINATOR: &str = "\r\n\r\n";

pub fn reply_text(serial: u64) -> String {
    format!("reply {serial} from server")
}

/// Appends the blank-line terminator to messages that look like an HTTP GET.
pub fn frame_request(message: &str) -> String {
    if message.starts_with("GET") {
        format!("{message}{HTTP_TERMINATOR}")
    } else {
        message.to_string()
    }
}

pub struct Responder {
    listener: TcpListener,
}

impl Responder {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves until `shutdown` resolves or a client sends nothing at all.
    /// Replies are numbered by accepted connection, so a failed exchange still
    /// uses up its number. Returns how many replies were sent.
    pub async fn run_until<F>(self, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut accepted = 0;
        let mut served = 0;

        loop {
            let (stream, peer) = select! {
                _ = &mut shutdown => break,
                result = self.listener.accept() => result.context("failed to accept connection")?,
            };
            accepted += 1;
            info!(%peer, serial = accepted, "connection accepted");

            match answer(stream, accepted).await {
                Ok(true) => served += 1,
                Ok(false) => {
                    info!(%peer, "empty request, responder stopping");
                    break;
                }
                Err(err) => warn!(%peer, error = ?err, "exchange failed"),
            }
        }

        Ok(served)
    }

    pub async fn run_until_ctrl_c(self) -> Result<u64> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

/// Answers one request. `Ok(false)` means the client sent nothing.
async fn answer(mut stream: TcpStream, serial: u64) -> Result<bool> {
    let mut buf = vec![0u8; EXCHANGE_BUFFER];
    let Some(request) = read_message(&mut stream, &mut buf, None).await? else {
        return Ok(false);
    };
    debug!(request = %String::from_utf8_lossy(&request), "received request");

    write_message(&mut stream, reply_text(serial).as_bytes()).await?;
    let _ = stream.shutdown().await;
    Ok(true)
}

pub async fn respond(args: RespondArgs) -> Result<()> {
    let responder = Responder::bind(args.listen).await?;
    info!("responder listening on {}", responder.local_addr()?);
    let served = responder.run_until_ctrl_c().await?;
    info!(served, "responder finished");
    Ok(())
}

pub async fn request(args: RequestArgs) -> Result<()> {
    let stream = TcpStream::connect(&args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);
    let (mut reader, mut writer) = stream.into_split();
    let mut stdout = tokio::io::stdout();

    if args.messages.is_empty() {
        let mut stdin = BufReader::new(tokio::io::stdin());
        let messages = read_until_stop(&mut stdin).await?;
        exchange(&mut reader, &mut writer, &messages, &mut stdout).await?;
    } else {
        exchange(&mut reader, &mut writer, &args.messages, &mut stdout).await?;
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown requester cleanly");
    }
    Ok(())
}

async fn read_until_stop<I>(input: &mut I) -> Result<Vec<String>>
where
    I: AsyncBufRead + Unpin,
{
    let mut messages = Vec::new();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().eq_ignore_ascii_case(STOP_WORD) {
            break;
        }
        messages.push(line);
    }
    Ok(messages)
}

/// Sends each message and prints the reply to it. Returns the number of
/// replies received; stops early if the peer closes.
pub async fn exchange<R, W, O>(
    reader: &mut R,
    writer: &mut W,
    messages: &[String],
    output: &mut O,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; EXCHANGE_BUFFER];
    let mut replies = 0;

    for message in messages {
        write_message(writer, frame_request(message).as_bytes())
            .await
            .context("failed to send request")?;

        match read_message(reader, &mut buf, None)
            .await
            .context("failed to read reply")?
        {
            Some(reply) => {
                let line = format!("received: {}\n", String::from_utf8_lossy(&reply));
                output.write_all(line.as_bytes()).await?;
                output.flush().await?;
                replies += 1;
            }
            None => {
                output.write_all(b"*** server closed the connection\n").await?;
                output.flush().await?;
                break;
            }
        }
    }

    Ok(replies)
}
