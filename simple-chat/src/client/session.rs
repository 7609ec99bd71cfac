use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::connection::{ClientConnection, ClientHooks},
    console::ChatDisplay,
    directive::{self, Directive, INVALID_COMMAND},
    error::{ClientError, TransportError},
    login::LoginId,
    server::DEFAULT_PORT,
};

/// Prefix of the handshake sent as soon as a link is established. The id is
/// appended with no separating space.
pub const LOGIN_HANDSHAKE: &str = directive::LOGIN;

pub const DEFAULT_HOST: &str = "localhost";

const SEND_FAILED: &str = "Could not send message to server.  Terminating client.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub login_id: String,
    pub host: String,
    pub port: u16,
}

impl ClientConfig {
    pub fn new(login_id: impl Into<String>) -> Self {
        Self {
            login_id: login_id.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Reacts to the link's lifecycle on behalf of one logged-in identity.
pub struct ClientSession {
    login_id: LoginId,
    display: Arc<dyn ChatDisplay>,
    shutdown: CancellationToken,
}

impl ClientSession {
    pub fn new(login_id: LoginId, display: Arc<dyn ChatDisplay>) -> Self {
        Self {
            login_id,
            display,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn login_id(&self) -> &LoginId {
        &self.login_id
    }

    pub fn handshake(&self) -> String {
        format!("{LOGIN_HANDSHAKE}{}", self.login_id)
    }
}

impl ClientHooks for ClientSession {
    fn connection_established(&self, connection: &ClientConnection) {
        if let Err(err) = connection.send(&self.handshake()) {
            warn!(error = %err, "failed to send login handshake");
            self.display
                .display("Unable to send loginID to the server, please try again");
        }
    }

    fn message_received(&self, _connection: &ClientConnection, text: &str) {
        self.display.display(text);
    }

    fn connection_closed(&self, _connection: &ClientConnection) {
        self.display.display("Connection closed");
    }

    fn connection_faulted(&self, _connection: &ClientConnection, fault: &TransportError) {
        debug!(error = %fault, "terminating after connection fault");
        self.display.display("The server has shut down.");
        self.shutdown.cancel();
    }
}

/// A [`ClientConnection`] wired to a [`ClientSession`]: what the console
/// drives.
pub struct ChatClient {
    connection: ClientConnection,
    session: Arc<ClientSession>,
}

impl ChatClient {
    /// Validates the login id and connects straight away; the handshake goes
    /// out as soon as the link is up.
    pub async fn connect(
        config: ClientConfig,
        display: Arc<dyn ChatDisplay>,
    ) -> Result<Self, ClientError> {
        let login_id = LoginId::parse(&config.login_id)?;
        let session = Arc::new(ClientSession::new(login_id, display));
        let connection = ClientConnection::new(config.host, config.port, session.clone());
        connection.open().await?;
        Ok(Self {
            connection,
            session,
        })
    }

    pub fn connection(&self) -> &ClientConnection {
        &self.connection
    }

    pub fn login_id(&self) -> &LoginId {
        self.session.login_id()
    }

    /// Cancelled when the client should exit: after `#quit`, a fatal send
    /// failure, or the server going away.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.session.shutdown.clone()
    }

    /// Handles a line typed on the client console.
    pub async fn handle_operator_input(&self, line: &str) {
        match Directive::parse(line) {
            None => self.send_chat(line).await,
            Some(Err(err)) => self.display(&err.to_string()),
            Some(Ok(directive)) => self.handle_directive(directive).await,
        }
    }

    /// Closes the link, then signals shutdown.
    pub async fn quit(&self) {
        self.connection.close().await;
        self.session.shutdown.cancel();
    }

    async fn handle_directive(&self, directive: Directive) {
        match directive {
            Directive::Quit => self.quit().await,
            Directive::Logoff => {
                if self.connection.is_open() {
                    self.connection.close().await;
                } else {
                    self.display("You are not connected to a server.");
                }
            }
            Directive::SetHost(host) => {
                if self.reject_while_connected("host name") {
                    return;
                }
                self.connection.set_host(host.as_str());
                self.display(&format!("The host name has been set to {host}"));
            }
            Directive::SetPort(port) => {
                if self.reject_while_connected("port number") {
                    return;
                }
                self.connection.set_port(port);
                self.display(&format!("The port number has been set to {port}"));
            }
            Directive::Login(_) => self.login().await,
            Directive::GetHost => {
                self.display(&format!("The host name is {}", self.connection.host()));
            }
            Directive::GetPort => {
                self.display(&format!(
                    "The port number for this server is {}",
                    self.connection.port()
                ));
            }
            other => {
                debug!(directive = other.keyword(), "directive not available on the client");
                self.display(INVALID_COMMAND);
            }
        }
    }

    /// Reconnects when disconnected. While connected, the bare `#login`
    /// directive is passed to the server as-is instead.
    async fn login(&self) {
        if self.connection.is_open() {
            self.send_or_terminate(directive::LOGIN).await;
            return;
        }
        if let Err(err) = self.connection.open().await {
            warn!(error = %err, "reconnect failed");
            self.display("Unable to connect to server, please try again");
        }
    }

    async fn send_chat(&self, text: &str) {
        if !self.connection.is_open() {
            self.display("You are not connected to a server. Use #login to reconnect.");
            return;
        }
        self.send_or_terminate(text).await;
    }

    async fn send_or_terminate(&self, text: &str) {
        if let Err(err) = self.connection.send(text) {
            warn!(error = %err, "failed to send message");
            self.display(SEND_FAILED);
            self.quit().await;
        }
    }

    fn reject_while_connected(&self, setting: &str) -> bool {
        if !self.connection.is_open() {
            return false;
        }
        self.display(&format!(
            "Cannot change the {setting} while connected. Use #logoff first."
        ));
        true
    }

    fn display(&self, message: &str) {
        self.session.display.display(message);
    }
}
