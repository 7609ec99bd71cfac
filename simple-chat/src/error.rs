use std::{io, net::SocketAddr};

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::{login::LoginId, server::ConnectionId};

/// A directive was recognized but its argument could not be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("{directive} requires an argument")]
    MissingArgument { directive: &'static str },
    #[error("'{0}' is not a valid port number")]
    InvalidPort(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection is closed")]
    Closed,
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("message contains a line break and cannot be framed")]
    InvalidMessage,
    #[error("failed to listen on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("inbound message exceeds the maximum frame length")]
    FrameTooLong,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the peer dropped the channel underneath us rather than the
    /// connection failing for some other reason.
    pub fn is_peer_reset(&self) -> bool {
        match self {
            TransportError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

impl From<LinesCodecError> for TransportError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => TransportError::FrameTooLong,
            LinesCodecError::Io(err) => TransportError::Io(err),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifyError {
    #[error("connection is already logged in as '{0}'")]
    AlreadyIdentified(LoginId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("login id must not be empty")]
pub struct InvalidLoginId;

/// Failure to bring up a client session.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    LoginId(#[from] InvalidLoginId),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
