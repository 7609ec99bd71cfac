//! Client half of the connection framework: one TCP link to the server with a
//! worker task that feeds [`ClientHooks`].

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    message::{self, MessageReader, MessageWriter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Callbacks invoked from the connection worker.
pub trait ClientHooks: Send + Sync + 'static {
    fn connection_established(&self, _connection: &ClientConnection) {}

    fn message_received(&self, connection: &ClientConnection, text: &str);

    /// The link was closed locally through [`ClientConnection::close`].
    fn connection_closed(&self, _connection: &ClientConnection) {}

    /// The server ended the stream or the link failed.
    fn connection_faulted(&self, _connection: &ClientConnection, _fault: &TransportError) {}
}

#[derive(Clone)]
pub struct ClientConnection {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    hooks: Arc<dyn ClientHooks>,
    state: Mutex<LinkState>,
    generation: AtomicU64,
}

struct LinkState {
    host: String,
    port: u16,
    link: Link,
}

enum Link {
    Disconnected,
    Connecting,
    Connected(ActiveLink),
}

struct ActiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    closer: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl ClientConnection {
    pub fn new(host: impl Into<String>, port: u16, hooks: Arc<dyn ClientHooks>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                hooks,
                state: Mutex::new(LinkState {
                    host: host.into(),
                    port,
                    link: Link::Disconnected,
                }),
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// Connects to the current host and port. Does nothing when a link is
    /// already open or being opened.
    pub async fn open(&self) -> Result<(), TransportError> {
        let addr = {
            let mut state = self.inner.state.lock();
            if !matches!(state.link, Link::Disconnected) {
                return Ok(());
            }
            state.link = Link::Connecting;
            format!("{}:{}", state.host, state.port)
        };

        let stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(source) => {
                self.inner.state.lock().link = Link::Disconnected;
                return Err(TransportError::Connect { addr, source });
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let (outbound, queue) = mpsc::unbounded_channel();
        let closer = CancellationToken::new();
        self.inner.state.lock().link = Link::Connected(ActiveLink {
            generation,
            outbound,
            closer: closer.clone(),
            worker: None,
        });

        let worker = tokio::spawn(self.clone().run(generation, stream, queue, closer));
        if let Link::Connected(active) = &mut self.inner.state.lock().link {
            if active.generation == generation {
                active.worker = Some(worker);
            }
        }

        info!(%addr, "connected to server");
        self.inner.hooks.connection_established(self);
        Ok(())
    }

    /// Closes the link and waits for the worker to report it. Must not be
    /// awaited from inside a hook.
    pub async fn close(&self) {
        let active = {
            let mut state = self.inner.state.lock();
            match std::mem::replace(&mut state.link, Link::Disconnected) {
                Link::Connected(active) => active,
                other => {
                    state.link = other;
                    return;
                }
            }
        };

        active.closer.cancel();
        if let Some(worker) = active.worker {
            if let Err(error) = worker.await {
                warn!(?error, "connection worker terminated abnormally");
            }
        }
    }

    /// Queues `text` for the server.
    pub fn send(&self, text: &str) -> Result<(), TransportError> {
        message::ensure_single_line(text)?;
        let state = self.inner.state.lock();
        let Link::Connected(active) = &state.link else {
            return Err(TransportError::Closed);
        };
        active
            .outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner.state.lock().link {
            Link::Disconnected => ConnectionState::Disconnected,
            Link::Connecting => ConnectionState::Connecting,
            Link::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn host(&self) -> String {
        self.inner.state.lock().host.clone()
    }

    pub fn port(&self) -> u16 {
        self.inner.state.lock().port
    }

    /// Changes the target for the next [`ClientConnection::open`].
    pub fn set_host(&self, host: impl Into<String>) {
        self.inner.state.lock().host = host.into();
    }

    pub fn set_port(&self, port: u16) {
        self.inner.state.lock().port = port;
    }

    async fn run(
        self,
        generation: u64,
        stream: TcpStream,
        mut queue: mpsc::UnboundedReceiver<String>,
        closer: CancellationToken,
    ) {
        let (reader, writer) = stream.into_split();
        let mut inbound = message::reader(reader);
        let mut outbound = message::writer(writer);

        let outcome = self
            .pump(&mut inbound, &mut outbound, &mut queue, &closer)
            .await;

        if let Err(error) = SinkExt::<String>::close(&mut outbound).await {
            debug!(%error, "connection did not shut down cleanly");
        }
        self.release(generation);

        match outcome {
            Ok(()) => {
                info!("connection closed");
                self.inner.hooks.connection_closed(&self);
            }
            Err(fault) => {
                warn!(error = %fault, "connection to server lost");
                self.inner.hooks.connection_faulted(&self, &fault);
            }
        }
    }

    async fn pump(
        &self,
        inbound: &mut MessageReader<OwnedReadHalf>,
        outbound: &mut MessageWriter<OwnedWriteHalf>,
        queue: &mut mpsc::UnboundedReceiver<String>,
        closer: &CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            select! {
                biased;
                _ = closer.cancelled() => {
                    // Flush whatever the operator typed before closing.
                    while let Ok(text) = queue.try_recv() {
                        outbound.send(text).await?;
                    }
                    return Ok(());
                }
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.inner.hooks.message_received(self, &text),
                    Some(Err(fault)) => return Err(fault),
                    None => return Err(TransportError::PeerClosed),
                },
                Some(text) = queue.recv() => outbound.send(text).await?,
            }
        }
    }

    /// Forgets the link if it is still the one this worker served.
    fn release(&self, generation: u64) {
        let mut state = self.inner.state.lock();
        if let Link::Connected(active) = &state.link {
            if active.generation == generation {
                state.link = Link::Disconnected;
            }
        }
    }
}
