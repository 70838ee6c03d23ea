use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::server::ServerConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay, accepting TCP clients.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
    /// Answer one message per connection, one connection at a time.
    Respond(RespondArgs),
    /// Send messages to a responder and print each reply.
    Request(RequestArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Host name or address to bind.
    #[arg(short = 'H', long, default_value = "localhost")]
    pub host: String,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Pending connection queue length.
    #[arg(long, default_value_t = crate::server::DEFAULT_BACKLOG)]
    pub backlog: u32,

    /// Largest message a single read may return, in bytes.
    #[arg(long, default_value_t = crate::protocol::DEFAULT_READ_BUFFER)]
    pub read_buffer: usize,

    /// Disconnect clients that stay silent this many seconds.
    #[arg(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Give up on a recipient whose write takes longer than this many seconds.
    #[arg(long, value_name = "SECS")]
    pub write_timeout: Option<u64>,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            backlog: args.backlog,
            read_buffer: args.read_buffer,
            idle_timeout: args.idle_timeout.map(Duration::from_secs),
            write_timeout: args.write_timeout.map(Duration::from_secs),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay address as host:port.
    #[arg(long, default_value = "localhost:8080")]
    pub server: String,

    /// Display name to send right after connecting. Without it, the first
    /// line typed answers the prompt.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct RespondArgs {
    /// Socket address to listen on.
    #[arg(long, default_value = "127.0.0.1:1050")]
    pub listen: SocketAddr,
}

#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Responder address as host:port.
    #[arg(long, default_value = "127.0.0.1:1050")]
    pub server: String,

    /// Message to send; repeat for several. Without any, lines are read from
    /// stdin until "bye".
    #[arg(short, long = "message")]
    pub messages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn server_defaults_match_config_defaults() {
        let cli = Cli::parse_from(["chat_relay", "server"]);
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = ServerConfig::from(args);
        let defaults = ServerConfig::default();

        assert_eq!(config.host, defaults.host);
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.backlog, defaults.backlog);
        assert_eq!(config.read_buffer, defaults.read_buffer);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn server_timeouts_are_seconds() {
        let cli = Cli::parse_from([
            "chat_relay",
            "server",
            "--port",
            "0",
            "--idle-timeout",
            "30",
            "--write-timeout",
            "2",
        ]);
        let Command::Server(args) = cli.command else {
            panic!("expected server command");
        };
        let config = ServerConfig::from(args);

        assert_eq!(config.port, 0);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.write_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn request_collects_repeated_messages() {
        let cli = Cli::parse_from(["chat_relay", "request", "-m", "one", "--message", "two"]);
        let Command::Request(args) = cli.command else {
            panic!("expected request command");
        };
        assert_eq!(args.messages, vec!["one", "two"]);
        assert_eq!(args.server, "127.0.0.1:1050");
    }
}
