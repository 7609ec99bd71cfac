//! Minimal multi-client text chat over TCP.
//!
//! One server broadcasts chat lines among connected clients; each client
//! announces a login id once per connection. Each module focuses on a
//! concrete responsibility:
//!
//! - [`directive`] classifies console input into `#`-directives or chat text.
//! - [`login`] holds the validated login id type.
//! - [`message`] frames one message per line on the wire.
//! - [`server`] accepts connections, enforces the login handshake and fans
//!   chat out to every connection.
//! - [`client`] keeps one link to the server, performs the handshake and
//!   relays console input.
//! - [`console`] is the surface both sides report to, plus operator input.
//! - [`cli`] parses the command line for server and client modes.
//!
//! Integration tests use this crate directly to drive real servers and
//! clients over loopback sockets.

pub mod cli;
pub mod client;
pub mod console;
pub mod directive;
pub mod error;
pub mod login;
pub mod message;
pub mod server;
