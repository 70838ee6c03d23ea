//! Multi-client TCP chat relay.
//!
//! Every connection is asked for a display name, then anything it sends is
//! relayed, prefixed with that name, to every other connected client. The
//! wire format is unframed: one read is one message.
//!
//! - [`server`] binds the listener and spawns one task per connection.
//! - [`handler`] runs a connection through the name handshake and the relay
//!   loop, and unregisters it on every exit path.
//! - [`registry`] is the mutex-guarded table of named sessions.
//! - [`broadcast`] fans one payload out to a registry snapshot.
//! - [`session`] holds a client's name, write half, and liveness flag.
//! - [`protocol`] has the fixed server texts and the raw read/write helpers.
//! - [`client`] is a terminal chat client.
//! - [`exchange`] is a one-shot request/response responder and requester.
//! - [`cli`] parses the command line for all four modes.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod exchange;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
