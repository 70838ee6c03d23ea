use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn terminal_clients_chat_through_the_relay() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");

    let mut server = spawn_logged(
        &binary,
        &["server", "--host", "127.0.0.1", "--port", "0"],
        "relay listening on ",
    )
    .await?;

    let mut alice = spawn_client(&binary, "alice", &server.addr).await?;
    server.wait_for_log(&["client joined", "name=alice"]).await?;
    let mut bob = spawn_client(&binary, "bob", &server.addr).await?;

    alice
        .expect("bob has recently joined us")
        .await
        .context("alice waiting for bob's arrival")?;

    alice.send_line("hi").await?;
    bob.expect("alice:hi").await.context("bob waiting for alice")?;

    bob.send_line("hello alice").await?;
    alice
        .expect("bob:hello alice")
        .await
        .context("alice waiting for bob")?;

    alice.send_line("/quit").await?;
    alice.expect("*** leaving chat").await?;
    alice.finish("alice client").await?;

    bob.send_line("/quit").await?;
    bob.expect("*** leaving chat").await?;
    bob.finish("bob client").await?;

    server.stop().await;
    Ok(())
}

#[tokio::test]
async fn requests_get_numbered_replies() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("chat_relay");

    let mut responder = spawn_logged(
        &binary,
        &["respond", "--listen", "127.0.0.1:0"],
        "responder listening on ",
    )
    .await?;

    for (serial, message) in ["hello", "GET /"].into_iter().enumerate() {
        let output = Command::new(&binary)
            .args(["request", "--server", responder.addr.as_str(), "-m", message])
            .env("RUST_LOG", "warn")
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .context("failed to run request")?;
        assert!(output.status.success(), "request exited with {}", output.status);

        let printed = String::from_utf8(output.stdout)?;
        assert_eq!(
            printed,
            format!("received: reply {} from server\n", serial + 1)
        );
    }

    responder.stop().await;
    Ok(())
}

/// A long-running subcommand whose listening address was read from its log.
struct Listener {
    child: Child,
    addr: String,
    log: BufReader<ChildStdout>,
}

impl Listener {
    /// Reads log lines until one contains every fragment.
    async fn wait_for_log(&mut self, fragments: &[&str]) -> Result<()> {
        loop {
            let line = read_line(&mut self.log)
                .await?
                .with_context(|| format!("log ended before {fragments:?}"))?;
            if fragments.iter().all(|fragment| line.contains(fragment)) {
                return Ok(());
            }
        }
    }

    async fn stop(&mut self) {
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

async fn spawn_logged(binary: &Path, args: &[&str], banner: &str) -> Result<Listener> {
    let mut child = Command::new(binary)
        .args(args)
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {args:?}"))?;
    let stdout = child.stdout.take().context("stdout missing after spawn")?;
    let mut log = BufReader::new(stdout);

    let addr = loop {
        let line = read_line(&mut log)
            .await?
            .with_context(|| format!("{args:?} exited before logging its address"))?;
        if let Some(addr) = parse_banner(&line, banner) {
            break addr;
        }
    };

    Ok(Listener { child, addr, log })
}

fn parse_banner(line: &str, banner: &str) -> Option<String> {
    let (_, rest) = line.split_once(banner)?;
    let addr: String = rest
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ':')
        .collect();
    addr.contains(':').then_some(addr)
}

struct ClientProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    // Printed text not yet matched; chunks may share a line.
    pending: String,
}

impl ClientProcess {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to send line '{line}'"))?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Waits until `text` shows up in the printed output.
    async fn expect(&mut self, text: &str) -> Result<()> {
        loop {
            if let Some(at) = self.pending.find(text) {
                self.pending.drain(..at + text.len());
                return Ok(());
            }
            let line = read_line(&mut self.stdout)
                .await?
                .with_context(|| format!("output closed while waiting for {text:?}"))?;
            self.pending.push_str(&line);
        }
    }

    /// Closes stdin and waits for a clean exit.
    async fn finish(self, name: &str) -> Result<()> {
        let Self {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        ensure_success(&mut child, name).await
    }
}

async fn spawn_client(binary: &Path, name: &str, addr: &str) -> Result<ClientProcess> {
    let mut child = Command::new(binary)
        .args(["client", "--server", addr, "--name", name])
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn client {name}"))?;

    let stdin = child.stdin.take().context("client stdin missing")?;
    let stdout = child.stdout.take().context("client stdout missing")?;
    let mut process = ClientProcess {
        child,
        stdin,
        stdout: BufReader::new(stdout),
        pending: String::new(),
    };

    process
        .expect("Welcome to the chat room, Please type your name to continue")
        .await
        .with_context(|| format!("{name} waiting for prompt"))?;
    process
        .expect(&format!("Welcome {name}. Good to see you :)"))
        .await
        .with_context(|| format!("{name} waiting for welcome"))?;
    Ok(process)
}

async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| anyhow!("timed out waiting for line"))??;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn ensure_success(child: &mut Child, name: &str) -> Result<()> {
    let status = timeout(READ_TIMEOUT, child.wait())
        .await
        .with_context(|| format!("{name} did not exit"))?
        .with_context(|| format!("failed to await {name} process"))?;
    if !status.success() {
        return Err(anyhow!("{name} exited with status {status}"));
    }
    Ok(())
}
