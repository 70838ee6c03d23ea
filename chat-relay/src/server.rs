use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpSocket, TcpStream, lookup_host},
    select,
    task::JoinSet,
};
use tracing::{info, warn};

use crate::{
    broadcast::Broadcaster,
    handler::{SessionSettings, handle_connection},
    protocol::DEFAULT_READ_BUFFER,
    registry::Registry,
};

pub const DEFAULT_BACKLOG: u32 = 3;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub read_buffer: usize,
    pub idle_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
            backlog: DEFAULT_BACKLOG,
            read_buffer: DEFAULT_READ_BUFFER,
            idle_timeout: None,
            write_timeout: None,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    broadcaster: Broadcaster,
    settings: SessionSettings,
}

impl Server {
    /// Resolves the configured host and binds a reusable listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = lookup_host((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("failed to resolve {}:{}", config.host, config.port))?
            .next()
            .with_context(|| format!("no address found for {}", config.host))?;

        let listener = listen(addr, config.backlog)
            .with_context(|| format!("failed to listen on {addr}"))?;

        let registry = Arc::new(Registry::new());
        Ok(Self {
            listener,
            broadcaster: Broadcaster::new(registry, config.write_timeout),
            settings: SessionSettings {
                read_buffer: config.read_buffer,
                idle_timeout: config.idle_timeout,
            },
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.broadcaster.registry())
    }

    /// Accepts clients until `shutdown` resolves or accept fails.
    ///
    /// Accept failures are returned as errors. On shutdown every live session
    /// is aborted, which unregisters it.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            broadcaster,
            settings,
        } = self;
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            select! {
                _ = &mut shutdown => {
                    info!(active = broadcaster.registry().len(), "server shutting down");
                    break Ok(());
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            spawn_session(&mut sessions, stream, peer, &broadcaster, settings);
                        }
                        Err(err) => {
                            break Err(anyhow::Error::new(err).context("failed to accept connection"));
                        }
                    }
                }
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = finished {
                        if err.is_panic() {
                            warn!(error = ?err, "session task panicked");
                        }
                    }
                }
            }
        };

        sessions.shutdown().await;
        result
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

fn spawn_session(
    sessions: &mut JoinSet<()>,
    stream: TcpStream,
    peer: SocketAddr,
    broadcaster: &Broadcaster,
    settings: SessionSettings,
) {
    info!(%peer, "connection accepted");
    let broadcaster = broadcaster.clone();
    sessions.spawn(async move {
        if let Err(err) = handle_connection(stream, peer, broadcaster, settings).await {
            warn!(%peer, error = ?err, "connection closed with error");
        }
    });
}
