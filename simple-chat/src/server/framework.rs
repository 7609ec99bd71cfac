//! Server half of the connection framework.
//!
//! [`Server`] owns the accept loop and one worker task per connection. Each
//! worker multiplexes inbound frames, the connection's outbound queue and its
//! close signal, and reports everything it sees to a [`ServerHooks`]
//! implementation. The registry of open connections lives behind a single
//! lock so broadcast never races with a connection joining or leaving.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    error::{IdentifyError, TransportError},
    login::LoginId,
    message::{self, MessageReader, MessageWriter},
};

pub const DEFAULT_PORT: u16 = 5555;

pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

/// Last-known view of a connection, handed to lifecycle hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub login_id: Option<LoginId>,
}

/// Callbacks the framework invokes from its accept loop and connection
/// workers. Every hook runs on the worker of the connection it concerns, so
/// implementations must not block.
pub trait ServerHooks: Send + Sync + 'static {
    fn listening_started(&self, _server: &Server, _addr: SocketAddr) {}

    fn listening_stopped(&self, _server: &Server) {}

    fn server_closed(&self, _server: &Server) {}

    fn client_connected(&self, _server: &Server, _client: &ClientInfo) {}

    fn message_received(&self, server: &Server, connection: ConnectionId, text: &str);

    fn client_disconnected(&self, _server: &Server, _client: &ClientInfo) {}

    fn client_faulted(&self, _server: &Server, _client: &ClientInfo, _fault: &TransportError) {}
}

/// Cloneable handle to a running server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    hooks: Arc<dyn ServerHooks>,
    host: IpAddr,
    listener: AsyncMutex<ListenerState>,
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    next_id: AtomicU64,
    workers: TaskTracker,
}

struct ListenerState {
    port: u16,
    accepting: Option<AcceptLoop>,
}

struct AcceptLoop {
    local_addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct ConnectionRecord {
    peer: SocketAddr,
    login_id: Option<LoginId>,
    outbound: mpsc::UnboundedSender<String>,
    closer: CancellationToken,
}

impl ConnectionRecord {
    fn info(&self, id: ConnectionId) -> ClientInfo {
        ClientInfo {
            id,
            peer: self.peer,
            login_id: self.login_id.clone(),
        }
    }
}

impl Server {
    pub fn new(config: ServerConfig, hooks: Arc<dyn ServerHooks>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                hooks,
                host: config.host,
                listener: AsyncMutex::new(ListenerState {
                    port: config.port,
                    accepting: None,
                }),
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                workers: TaskTracker::new(),
            }),
        }
    }

    /// Starts accepting connections on the configured port.
    ///
    /// Calling this while already listening returns the current address.
    pub async fn listen(&self) -> Result<SocketAddr, TransportError> {
        let mut state = self.inner.listener.lock().await;
        if let Some(accepting) = &state.accepting {
            return Ok(accepting.local_addr);
        }

        let addr = SocketAddr::new(self.inner.host, state.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(%local_addr, "server listening");
        self.inner.hooks.listening_started(self, local_addr);

        let stop = CancellationToken::new();
        let task = tokio::spawn(accept_loop(self.clone(), listener, stop.clone()));
        state.accepting = Some(AcceptLoop {
            local_addr,
            stop,
            task,
        });

        Ok(local_addr)
    }

    /// Stops accepting new connections. Open connections are left alone.
    pub async fn stop_listening(&self) {
        let mut state = self.inner.listener.lock().await;
        let Some(accepting) = state.accepting.take() else {
            return;
        };

        accepting.stop.cancel();
        if let Err(error) = accepting.task.await {
            warn!(?error, "accept loop terminated abnormally");
        }
        drop(state);

        info!("server stopped listening");
        self.inner.hooks.listening_stopped(self);
    }

    /// Stops listening and closes every open connection, waiting until each
    /// one has reported its disconnect.
    pub async fn close(&self) {
        self.stop_listening().await;

        let closers: Vec<CancellationToken> = self
            .inner
            .connections
            .lock()
            .values()
            .map(|record| record.closer.clone())
            .collect();
        for closer in closers {
            closer.cancel();
        }

        self.inner.workers.close();
        self.inner.workers.wait().await;
        self.inner.workers.reopen();

        info!("server closed");
        self.inner.hooks.server_closed(self);
    }

    pub async fn is_listening(&self) -> bool {
        self.inner.listener.lock().await.accepting.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .listener
            .lock()
            .await
            .accepting
            .as_ref()
            .map(|accepting| accepting.local_addr)
    }

    /// The configured port, or the port actually bound while listening on an
    /// ephemeral one (configured as 0).
    pub async fn port(&self) -> u16 {
        let state = self.inner.listener.lock().await;
        match &state.accepting {
            Some(accepting) if state.port == 0 => accepting.local_addr.port(),
            _ => state.port,
        }
    }

    /// Takes effect on the next [`Server::listen`].
    pub async fn set_port(&self, port: u16) {
        self.inner.listener.lock().await.port = port;
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Queues `text` for one connection.
    pub fn send_to(&self, connection: ConnectionId, text: &str) -> Result<(), TransportError> {
        message::ensure_single_line(text)?;
        let connections = self.inner.connections.lock();
        let record = connections
            .get(&connection)
            .ok_or(TransportError::Closed)?;
        record
            .outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    /// Queues `text` for every open connection and returns how many accepted
    /// it. A recipient that has gone away does not stop the others.
    pub fn broadcast(&self, text: &str) -> usize {
        if let Err(error) = message::ensure_single_line(text) {
            warn!(%error, "refusing to broadcast message");
            return 0;
        }

        let connections = self.inner.connections.lock();
        let mut delivered = 0;
        for (id, record) in connections.iter() {
            match record.outbound.send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(connection = id, "skipping broadcast to closing connection"),
            }
        }
        delivered
    }

    /// Asks the worker of `connection` to shut it down. Safe to call from any
    /// task, including from inside a hook for that same connection.
    pub fn close_connection(&self, connection: ConnectionId) -> bool {
        match self.inner.connections.lock().get(&connection) {
            Some(record) => {
                record.closer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn login_id(&self, connection: ConnectionId) -> Option<LoginId> {
        self.inner
            .connections
            .lock()
            .get(&connection)
            .and_then(|record| record.login_id.clone())
    }

    /// Assigns the login id of a connection. A connection is identified at
    /// most once.
    pub fn identify(&self, connection: ConnectionId, login_id: LoginId) -> Result<(), IdentifyError> {
        let mut connections = self.inner.connections.lock();
        let record = connections
            .get_mut(&connection)
            .ok_or(IdentifyError::Closed(connection))?;

        if let Some(existing) = &record.login_id {
            return Err(IdentifyError::AlreadyIdentified(existing.clone()));
        }
        record.login_id = Some(login_id);
        Ok(())
    }

    fn register(&self, stream: TcpStream, peer: SocketAddr) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, queue) = mpsc::unbounded_channel();
        let closer = CancellationToken::new();
        let record = ConnectionRecord {
            peer,
            login_id: None,
            outbound,
            closer: closer.clone(),
        };
        let info = record.info(id);
        self.inner.connections.lock().insert(id, record);

        let server = self.clone();
        self.inner
            .workers
            .spawn(async move { server.run_connection(info, stream, queue, closer).await });
    }

    fn remove(&self, connection: ConnectionId) -> Option<ClientInfo> {
        self.inner
            .connections
            .lock()
            .remove(&connection)
            .map(|record| record.info(connection))
    }

    async fn run_connection(
        self,
        info: ClientInfo,
        stream: TcpStream,
        mut queue: mpsc::UnboundedReceiver<String>,
        closer: CancellationToken,
    ) {
        let id = info.id;
        debug!(connection = id, peer = %info.peer, "client connected");
        self.inner.hooks.client_connected(&self, &info);

        let (reader, writer) = stream.into_split();
        let mut inbound = message::reader(reader);
        let mut outbound = message::writer(writer);

        let outcome = self
            .pump(id, &mut inbound, &mut outbound, &mut queue, &closer)
            .await;

        if let Err(error) = SinkExt::<String>::close(&mut outbound).await {
            debug!(connection = id, %error, "connection did not shut down cleanly");
        }

        let last_known = self.remove(id).unwrap_or(info);
        match outcome {
            Ok(()) => {
                info!(connection = id, peer = %last_known.peer, "client disconnected");
                self.inner.hooks.client_disconnected(&self, &last_known);
            }
            Err(fault) => {
                warn!(connection = id, peer = %last_known.peer, error = %fault, "client connection faulted");
                self.inner.hooks.client_faulted(&self, &last_known, &fault);
            }
        }
    }

    async fn pump(
        &self,
        id: ConnectionId,
        inbound: &mut MessageReader<OwnedReadHalf>,
        outbound: &mut MessageWriter<OwnedWriteHalf>,
        queue: &mut mpsc::UnboundedReceiver<String>,
        closer: &CancellationToken,
    ) -> Result<(), TransportError> {
        loop {
            select! {
                biased;
                _ = closer.cancelled() => return Ok(()),
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.inner.hooks.message_received(self, id, &text),
                    Some(Err(fault)) => return Err(fault),
                    None => return Ok(()),
                },
                Some(text) = queue.recv() => outbound.send(text).await?,
            }
        }
    }
}

async fn accept_loop(server: Server, listener: TcpListener, stop: CancellationToken) {
    loop {
        select! {
            _ = stop.cancelled() => break,
            accept_result = listener.accept() => handle_accept_result(accept_result, &server),
        }
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, server: &Server) {
    match result {
        Ok((stream, peer)) => server.register(stream, peer),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}
