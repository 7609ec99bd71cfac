//! Server-side session rules: the login handshake, chat broadcast and the
//! operator's console directives.
//!
//! Each connection moves through `unidentified -> identified -> closed`. The
//! only thing an unidentified connection may do is `#login <id>`; a second
//! `#login` from an identified connection is a protocol violation and gets
//! that connection closed without anything being broadcast.

use std::{net::SocketAddr, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    console::ChatDisplay,
    directive::{Directive, INVALID_COMMAND},
    error::{IdentifyError, TransportError},
    login::LoginId,
    server::framework::{ClientInfo, ConnectionId, Server, ServerConfig, ServerHooks},
};

/// Marker prepended to chat typed on the server console.
pub const SERVER_MESSAGE_PREFIX: &str = "SERVER MESSAGE> ";

/// Sent to a connection that tries to chat before logging in.
pub const LOGIN_REQUIRED_NOTICE: &str = "You must log in with #login <id> before chatting.";

const UNIDENTIFIED: &str = "<unidentified>";

pub struct ServerSession {
    display: Arc<dyn ChatDisplay>,
    shutdown: CancellationToken,
}

impl ServerSession {
    pub fn new(display: Arc<dyn ChatDisplay>) -> Self {
        Self {
            display,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelled once the operator quits.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Handles a line typed on the server console.
    pub async fn handle_operator_input(&self, server: &Server, line: &str) {
        match Directive::parse(line) {
            None => {
                let announcement = format!("{SERVER_MESSAGE_PREFIX}{line}");
                self.display.display(&announcement);
                server.broadcast(&announcement);
            }
            Some(Err(err)) => self.display.display(&err.to_string()),
            Some(Ok(directive)) => self.handle_directive(server, directive).await,
        }
    }

    /// Closes every connection, then signals shutdown.
    pub async fn quit(&self, server: &Server) {
        server.close().await;
        self.shutdown.cancel();
    }

    async fn handle_directive(&self, server: &Server, directive: Directive) {
        match directive {
            Directive::Quit => self.quit(server).await,
            Directive::Stop => server.stop_listening().await,
            Directive::Close => server.close().await,
            Directive::SetPort(port) => {
                server.set_port(port).await;
                self.display
                    .display(&format!("The port number has been set to {port}"));
            }
            Directive::GetPort => {
                let port = server.port().await;
                self.display
                    .display(&format!("The port number for this server is {port}"));
            }
            Directive::Start => {
                if let Err(err) = server.listen().await {
                    warn!(error = ?err, "failed to resume listening");
                    self.display
                        .display("Unable to start listening for new clients, please try again");
                }
            }
            other => {
                debug!(directive = other.keyword(), "directive not available on the server");
                self.display.display(INVALID_COMMAND);
            }
        }
    }

    fn handle_login(
        &self,
        server: &Server,
        connection: ConnectionId,
        current: Option<LoginId>,
        candidate: Option<String>,
    ) {
        if current.is_some() {
            self.reject_duplicate_login(server, connection);
            return;
        }

        let Some(login_id) = candidate.and_then(|candidate| LoginId::parse(&candidate).ok()) else {
            self.display
                .display("Rejected #login without a login id.");
            self.notify(server, connection, LOGIN_REQUIRED_NOTICE);
            return;
        };

        match server.identify(connection, login_id.clone()) {
            Ok(()) => {
                info!(connection, login = %login_id, "client logged on");
                let announcement = format!("{login_id} has logged on.");
                self.display.display(&announcement);
                server.broadcast(&announcement);
            }
            Err(IdentifyError::AlreadyIdentified(_)) => {
                self.reject_duplicate_login(server, connection);
            }
            Err(IdentifyError::Closed(_)) => {
                debug!(connection, "connection closed before login completed");
            }
        }
    }

    fn reject_duplicate_login(&self, server: &Server, connection: ConnectionId) {
        warn!(connection, "duplicate login attempt");
        self.display
            .display("Error, client already logged in, terminating connection...");
        if !server.close_connection(connection) {
            self.display
                .display("Unable to close connection while client misentered #login");
        }
    }

    fn handle_chat(
        &self,
        server: &Server,
        connection: ConnectionId,
        login_id: Option<LoginId>,
        text: &str,
    ) {
        match login_id {
            Some(login_id) => {
                server.broadcast(&format!("{login_id}: {text}"));
            }
            None => {
                self.display
                    .display("Ignored message from a client that has not logged in.");
                self.notify(server, connection, LOGIN_REQUIRED_NOTICE);
            }
        }
    }

    fn notify(&self, server: &Server, connection: ConnectionId, text: &str) {
        if let Err(err) = server.send_to(connection, text) {
            debug!(connection, error = %err, "failed to notify client");
        }
    }
}

impl ServerHooks for ServerSession {
    fn listening_started(&self, _server: &Server, addr: SocketAddr) {
        self.display.display(&format!(
            "Server listening for connections on port {}",
            addr.port()
        ));
    }

    fn listening_stopped(&self, _server: &Server) {
        self.display
            .display("Server has stopped listening for connections.");
    }

    fn server_closed(&self, _server: &Server) {
        self.display.display("The server has shut down.");
    }

    fn client_connected(&self, _server: &Server, _client: &ClientInfo) {
        self.display
            .display("A new client has connected to the server.");
    }

    fn message_received(&self, server: &Server, connection: ConnectionId, text: &str) {
        let login_id = server.login_id(connection);
        self.display.display(&format!(
            "Message received: {text} from {}",
            describe(login_id.as_ref())
        ));

        match Directive::parse(text) {
            Some(Ok(Directive::Login(candidate))) => {
                self.handle_login(server, connection, login_id, candidate)
            }
            _ => self.handle_chat(server, connection, login_id, text),
        }
    }

    fn client_disconnected(&self, _server: &Server, client: &ClientInfo) {
        self.display.display(&format!(
            "Client '{}' has disconnected.",
            describe(client.login_id.as_ref())
        ));
    }

    fn client_faulted(&self, server: &Server, client: &ClientInfo, fault: &TransportError) {
        if fault.is_peer_reset() {
            self.client_disconnected(server, client);
            return;
        }
        self.display.display(&format!(
            "Connection to client '{}' failed: {fault}",
            describe(client.login_id.as_ref())
        ));
    }
}

fn describe(login_id: Option<&LoginId>) -> &str {
    login_id.map_or(UNIDENTIFIED, LoginId::as_str)
}

/// A [`Server`] wired to a [`ServerSession`]: what the console drives.
pub struct ChatServer {
    server: Server,
    session: Arc<ServerSession>,
}

impl ChatServer {
    pub fn new(config: ServerConfig, display: Arc<dyn ChatDisplay>) -> Self {
        let session = Arc::new(ServerSession::new(display));
        let server = Server::new(config, session.clone());
        Self { server, session }
    }

    pub async fn listen(&self) -> Result<SocketAddr, TransportError> {
        self.server.listen().await
    }

    pub async fn handle_operator_input(&self, line: &str) {
        self.session.handle_operator_input(&self.server, line).await;
    }

    pub async fn quit(&self) {
        self.session.quit(&self.server).await;
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.session.shutdown_token()
    }
}
