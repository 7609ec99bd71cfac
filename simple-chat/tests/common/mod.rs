//! Shared harness for integration tests: a display that can be awaited and a
//! raw line-protocol peer.

#![allow(dead_code)]

use std::{
    collections::HashSet,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use futures::{SinkExt, StreamExt};
use simple_chat::{
    console::ChatDisplay,
    message::{self, MessageReader, MessageWriter},
    server::{ChatServer, ServerConfig},
};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::mpsc,
    time::timeout,
};

pub const READ_TIMEOUT: Duration = Duration::from_secs(3);
pub const QUIET_PERIOD: Duration = Duration::from_millis(200);

/// Display that forwards every line to a channel the test can await.
pub struct ChannelDisplay {
    lines: mpsc::UnboundedSender<String>,
}

impl ChatDisplay for ChannelDisplay {
    fn display(&self, message: &str) {
        let _ = self.lines.send(message.to_string());
    }
}

pub struct DisplayFeed {
    lines: mpsc::UnboundedReceiver<String>,
}

pub fn display() -> (Arc<ChannelDisplay>, DisplayFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelDisplay { lines: tx }), DisplayFeed { lines: rx })
}

impl DisplayFeed {
    pub async fn next(&mut self) -> Result<String> {
        timeout(READ_TIMEOUT, self.lines.recv())
            .await
            .context("timed out waiting for display line")?
            .ok_or_else(|| anyhow!("display closed"))
    }

    /// Skips lines until `expected` shows up.
    pub async fn wait_for(&mut self, expected: &str) -> Result<()> {
        loop {
            let line = self
                .next()
                .await
                .with_context(|| format!("waiting for '{expected}'"))?;
            if line == expected {
                return Ok(());
            }
        }
    }

    /// Skips lines until every one of `expected` has shown up, in any order.
    pub async fn wait_for_all(&mut self, expected: &[String]) -> Result<()> {
        let mut pending: HashSet<&str> = expected.iter().map(String::as_str).collect();
        while !pending.is_empty() {
            let line = self
                .next()
                .await
                .with_context(|| format!("still waiting for {pending:?}"))?;
            pending.remove(line.as_str());
        }
        Ok(())
    }
}

pub async fn start_server() -> Result<(ChatServer, SocketAddr, DisplayFeed)> {
    let (display, mut feed) = display();
    let server = ChatServer::new(
        ServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
        },
        display,
    );
    let addr = server.listen().await?;
    feed.wait_for(&format!(
        "Server listening for connections on port {}",
        addr.port()
    ))
    .await?;
    Ok((server, addr, feed))
}

/// A peer speaking the wire protocol directly, without a client session.
pub struct RawPeer {
    reader: MessageReader<OwnedReadHalf>,
    writer: MessageWriter<OwnedWriteHalf>,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: message::reader(reader),
            writer: message::writer(writer),
        })
    }

    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.writer.send(text).await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Option<String>> {
        match timeout(READ_TIMEOUT, self.reader.next()).await {
            Ok(Some(frame)) => Ok(Some(frame?)),
            Ok(None) => Ok(None),
            Err(_) => Err(anyhow!("timed out waiting for server message")),
        }
    }

    pub async fn expect(&mut self, expected: &str) -> Result<()> {
        let line = self
            .recv()
            .await?
            .with_context(|| format!("stream closed while waiting for '{expected}'"))?;
        if line != expected {
            return Err(anyhow!("expected '{expected}', got '{line}'"));
        }
        Ok(())
    }

    /// Discards lines up to and including `expected`.
    pub async fn skip_until(&mut self, expected: &str) -> Result<()> {
        loop {
            let line = self
                .recv()
                .await?
                .with_context(|| format!("stream closed while waiting for '{expected}'"))?;
            if line == expected {
                return Ok(());
            }
        }
    }

    /// Connects and logs in the same way a client session does.
    pub async fn login(addr: SocketAddr, login_id: &str) -> Result<Self> {
        let mut peer = Self::connect(addr).await?;
        peer.send(&format!("#login{login_id}")).await?;
        peer.expect(&format!("{login_id} has logged on.")).await?;
        Ok(peer)
    }

    /// Drops the connection with an RST instead of an orderly shutdown.
    pub fn reset(self) -> Result<()> {
        let stream = self
            .reader
            .into_inner()
            .reunite(self.writer.into_inner())?;
        stream.set_linger(Some(Duration::ZERO))?;
        drop(stream);
        Ok(())
    }

    /// Reads `count` lines, failing if the stream ends first.
    pub async fn recv_lines(&mut self, count: usize) -> Result<Vec<String>> {
        let mut lines = Vec::with_capacity(count);
        for _ in 0..count {
            let line = self
                .recv()
                .await?
                .with_context(|| format!("stream closed after {} lines", lines.len()))?;
            lines.push(line);
        }
        Ok(lines)
    }

    /// True when nothing arrives within a short quiet period.
    pub async fn is_quiet(&mut self) -> bool {
        timeout(QUIET_PERIOD, self.reader.next()).await.is_err()
    }
}
