//! # TCP listener
//!
//! Accepts incoming connections from slaves that dial in to the master and
//! turns every connection into a [`TcpStreamSession`]. The accept loop runs on
//! a spawned Tokio task until the server is disposed; sessions are handed to
//! the caller's callback and belong to the caller from then on.
//!
//! An optional [`Handshake`] can inspect each new session first. It runs on
//! its own task so a slow peer never stalls accepting:
//!
//! - `Ok(Some(address))`: the session is bound to `address` and handed over,
//! - `Ok(None)` or an error: the connection is closed, the callback never
//!   sees it.
//!
//! ```rust,no_run
//! use voltage_modbus_session::server::ModbusTcpServer;
//!
//! # async fn run() -> voltage_modbus_session::ModbusResult<()> {
//! let mut server = ModbusTcpServer::bind("", 5020).await?;
//! server.wait_for_connections(|session| {
//!     println!("slave connected: {:?}", session.slave_address());
//! })?;
//! // ...
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::DEFAULT_TCP_PORT;
use crate::error::{ModbusError, ModbusResult};
use crate::tcp::TcpSession;
use crate::transport::{StreamConfig, StreamProtocol};

/// Session over an accepted TCP connection.
pub type TcpStreamSession = TcpSession<StreamProtocol<TcpStream>>;

/// Identification step run on every accepted session.
pub trait Handshake: Send + Sync + 'static {
    /// Return the slave address learned from the peer, or `None` to reject it.
    fn identify(
        &self,
        session: &mut TcpStreamSession,
    ) -> impl Future<Output = ModbusResult<Option<u8>>> + Send;
}

/// Placeholder for servers started without a handshake.
struct NoHandshake;

impl Handshake for NoHandshake {
    async fn identify(&self, _session: &mut TcpStreamSession) -> ModbusResult<Option<u8>> {
        Ok(None)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpServerConfig {
    /// IP address to listen on; empty listens on all interfaces
    pub bind_address: String,
    pub port: u16,
    /// Transport settings of accepted sessions
    pub stream: StreamConfig,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::new(),
            port: DEFAULT_TCP_PORT,
            stream: StreamConfig::default(),
        }
    }
}

impl TcpServerConfig {
    /// Listen on `bind_address:port`.
    pub fn new(bind_address: impl Into<String>, port: u16) -> Self {
        Self {
            bind_address: bind_address.into(),
            port,
            ..Self::default()
        }
    }

    /// Stream settings for accepted connections.
    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Resolve the socket address to bind.
    pub fn socket_addr(&self) -> ModbusResult<SocketAddr> {
        let ip = if self.bind_address.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            self.bind_address.parse::<IpAddr>().map_err(|e| {
                ModbusError::invalid_argument(format!(
                    "Invalid bind address '{}': {}",
                    self.bind_address, e
                ))
            })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Modbus TCP listener producing master sessions for incoming connections.
#[derive(Debug)]
pub struct ModbusTcpServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    stream_config: StreamConfig,
    runtime: Handle,
    shutdown_tx: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    accept_task: Option<JoinHandle<()>>,
    disposed: bool,
}

impl ModbusTcpServer {
    /// Bind `address:port`. An empty address listens on all interfaces.
    pub async fn bind(address: &str, port: u16) -> ModbusResult<Self> {
        Self::with_config(TcpServerConfig::new(address, port)).await
    }

    /// Bind using `config`.
    pub async fn with_config(config: TcpServerConfig) -> ModbusResult<Self> {
        let addr = config.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        info!("Modbus TCP server bound to {}", local_addr);
        Ok(Self {
            listener: Some(listener),
            local_addr,
            stream_config: config.stream,
            runtime: Handle::current(),
            shutdown_tx,
            is_running: Arc::new(AtomicBool::new(false)),
            accept_task: None,
            disposed: false,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start accepting; every connection is handed to `on_accept` as is.
    ///
    /// Can be started once; a second call fails with `InvalidOperation`.
    pub fn wait_for_connections<F>(&mut self, on_accept: F) -> ModbusResult<()>
    where
        F: Fn(TcpStreamSession) + Send + Sync + 'static,
    {
        self.start(on_accept, None::<NoHandshake>)
    }

    /// Start accepting; every connection must pass `handshake` before it is
    /// handed to `on_accept`.
    pub fn wait_for_connections_with_handshake<F, H>(
        &mut self,
        on_accept: F,
        handshake: H,
    ) -> ModbusResult<()>
    where
        F: Fn(TcpStreamSession) + Send + Sync + 'static,
        H: Handshake,
    {
        self.start(on_accept, Some(handshake))
    }

    fn start<F, H>(&mut self, on_accept: F, handshake: Option<H>) -> ModbusResult<()>
    where
        F: Fn(TcpStreamSession) + Send + Sync + 'static,
        H: Handshake,
    {
        if self.disposed {
            return Err(ModbusError::invalid_operation("Server already disposed"));
        }
        let listener = self.listener.take().ok_or_else(|| {
            ModbusError::invalid_operation("Server is already accepting connections")
        })?;

        let on_accept = Arc::new(on_accept);
        let handshake = handshake.map(Arc::new);
        let stream_config = self.stream_config;
        let is_running = self.is_running.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        self.is_running.store(true, Ordering::SeqCst);
        info!("Modbus TCP server accepting connections on {}", self.local_addr);

        let runtime = self.runtime.clone();
        self.accept_task = Some(self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                info!("Accepted connection from {}", peer);
                                if let Err(e) = stream.set_nodelay(true) {
                                    debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                                }
                                let protocol = StreamProtocol::new(stream, stream_config)
                                    .with_label("TCP");
                                let session = TcpSession::new(protocol);

                                match &handshake {
                                    Some(handshake) => {
                                        runtime.spawn(run_handshake(
                                            session,
                                            peer,
                                            handshake.clone(),
                                            on_accept.clone(),
                                        ));
                                    }
                                    None => on_accept(session),
                                }
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping server");
                        break;
                    }
                }
            }

            is_running.store(false, Ordering::SeqCst);
        }));

        Ok(())
    }

    /// Stop accepting and release the listening endpoint. Idempotent.
    ///
    /// Sessions already handed out are not affected.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.listener = None;
        let _ = self.shutdown_tx.send(());
        self.is_running.store(false, Ordering::SeqCst);
        info!("Modbus TCP server on {} disposed", self.local_addr);
    }

    /// Dispose and wait until the accept loop has exited.
    pub async fn shutdown(&mut self) {
        self.dispose();
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                error!("Accept loop terminated abnormally: {}", e);
            }
        }
    }
}

impl Drop for ModbusTcpServer {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_handshake<F, H>(
    mut session: TcpStreamSession,
    peer: SocketAddr,
    handshake: Arc<H>,
    on_accept: Arc<F>,
) where
    F: Fn(TcpStreamSession) + Send + Sync + 'static,
    H: Handshake,
{
    match handshake.identify(&mut session).await {
        Ok(Some(address)) => {
            info!("Handshake with {} identified slave {}", peer, address);
            session.set_slave_address(address);
            on_accept(session);
        }
        Ok(None) => {
            warn!("Handshake rejected connection from {}", peer);
            close_rejected(session, peer).await;
        }
        Err(e) => {
            warn!("Handshake with {} failed: {}", peer, e);
            close_rejected(session, peer).await;
        }
    }
}

async fn close_rejected(mut session: TcpStreamSession, peer: SocketAddr) {
    if let Err(e) = session.close().await {
        debug!("Closing connection from {} failed: {}", peer, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_config_default() {
        let config = TcpServerConfig::default();
        assert_eq!(config.port, DEFAULT_TCP_PORT);
        assert_eq!(
            config.socket_addr().unwrap(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_TCP_PORT)
        );
    }

    #[test]
    fn test_config_invalid_address() {
        let config = TcpServerConfig::new("not-an-ip", 502);
        assert!(matches!(
            config.socket_addr(),
            Err(ModbusError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let mut server = ModbusTcpServer::bind("127.0.0.1", 0).await.unwrap();
        assert!(!server.is_running());

        server.wait_for_connections(|_session| {}).unwrap();
        assert!(server.is_running());

        let result = server.wait_for_connections(|_session| {});
        assert!(matches!(result, Err(ModbusError::InvalidOperation { .. })));

        server.shutdown().await;
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_start_after_dispose_rejected() {
        let mut server = ModbusTcpServer::bind("127.0.0.1", 0).await.unwrap();
        server.dispose();
        server.dispose();

        let result = server.wait_for_connections(|_session| {});
        assert!(matches!(result, Err(ModbusError::InvalidOperation { .. })));
    }

    struct Reject;

    impl Handshake for Reject {
        async fn identify(&self, _session: &mut TcpStreamSession) -> ModbusResult<Option<u8>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_rejected_connection_is_closed() {
        let mut server = ModbusTcpServer::bind("127.0.0.1", 0).await.unwrap();
        server
            .wait_for_connections_with_handshake(
                |_session| panic!("rejected session must not reach the callback"),
                Reject,
            )
            .unwrap();

        let mut client = TcpStream::connect(server.local_addr()).await.unwrap();
        let mut buf = [0u8; 1];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);

        server.shutdown().await;
    }
}
