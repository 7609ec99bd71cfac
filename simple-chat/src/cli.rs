use std::net::{IpAddr, Ipv4Addr};

use clap::{Args, Parser, Subcommand};

use crate::{
    client::ClientConfig,
    server::{DEFAULT_PORT, ServerConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server and read operator directives from stdin.
    Server(ServerArgs),
    /// Connect to a server and chat under a login id.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address the server binds to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Login id announced to the server once connected.
    pub login_id: String,

    /// Host name of the server.
    #[arg(default_value = "localhost")]
    pub host: String,

    /// Port of the server.
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl From<&ServerArgs> for ServerConfig {
    fn from(args: &ServerArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
        }
    }
}

impl From<ClientArgs> for ClientConfig {
    fn from(args: ClientArgs) -> Self {
        Self {
            login_id: args.login_id,
            host: args.host,
            port: args.port,
        }
    }
}
