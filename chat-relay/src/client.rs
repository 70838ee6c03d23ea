use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{DEFAULT_READ_BUFFER, read_message, write_message},
};

const QUIT_COMMAND: &str = "/quit";

pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(&args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (mut reader, mut writer) = stream.into_split();
    if let Some(name) = &args.name {
        write_message(&mut writer, name.as_bytes())
            .await
            .context("failed to send name")?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    chat_loop(&mut reader, &mut writer, &mut stdin, &mut stdout).await?;

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
    Ok(())
}

/// Pumps server chunks to `output` and input lines to the server until either
/// side finishes.
pub async fn chat_loop<R, W, I, O>(
    server_reader: &mut R,
    server_writer: &mut W,
    input: &mut I,
    output: &mut O,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER];
    let mut line = String::new();

    loop {
        line.clear();
        select! {
            message = read_message(server_reader, &mut buf, None) => {
                match message.context("failed to read from server")? {
                    Some(chunk) => print_line(output, &String::from_utf8_lossy(&chunk)).await?,
                    None => {
                        print_line(output, "*** server closed the connection").await?;
                        break;
                    }
                }
            }
            bytes_read = input.read_line(&mut line) => {
                if !handle_input(bytes_read?, &line, server_writer, output).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_input<W, O>(
    bytes_read: usize,
    line: &str,
    server_writer: &mut W,
    output: &mut O,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
{
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = line.trim_end_matches(['\r', '\n']);
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case(QUIT_COMMAND) {
        print_line(output, "*** leaving chat").await?;
        return Ok(false);
    }

    write_message(server_writer, text.as_bytes())
        .await
        .context("failed to send message")?;
    Ok(true)
}

async fn print_line<O>(output: &mut O, line: &str) -> io::Result<()>
where
    O: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
