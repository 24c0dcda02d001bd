//! Session construction helpers.
//!
//! Opening the medium is the only place where the crate touches sockets or
//! serial ports directly; everything else goes through the transport
//! contract.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::info;

use crate::error::{ModbusError, ModbusResult};
use crate::forward::{ForwardSession, ForwardSettings};
use crate::rtu::RtuSession;
use crate::server::TcpStreamSession;
use crate::tcp::TcpSession;
use crate::transport::{StreamConfig, StreamProtocol};

/// Factory for RTU, TCP and forwarding sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFactory;

impl SessionFactory {
    /// RTU session over an already opened byte stream.
    pub fn rtu_session<S>(stream: S, config: StreamConfig) -> RtuSession<StreamProtocol<S>> {
        RtuSession::new(StreamProtocol::new(stream, config).with_label("RTU"))
    }

    /// Open `port` at `baud_rate` (8N1) and wrap it in an RTU session.
    #[cfg(feature = "rtu")]
    pub fn open_rtu(
        port: &str,
        baud_rate: u32,
        config: StreamConfig,
    ) -> ModbusResult<RtuSession<StreamProtocol<tokio_serial::SerialStream>>> {
        Self::open_rtu_with_settings(
            port,
            baud_rate,
            tokio_serial::DataBits::Eight,
            tokio_serial::StopBits::One,
            tokio_serial::Parity::None,
            config,
        )
    }

    /// Open a serial port with explicit line settings.
    #[cfg(feature = "rtu")]
    pub fn open_rtu_with_settings(
        port: &str,
        baud_rate: u32,
        data_bits: tokio_serial::DataBits,
        stop_bits: tokio_serial::StopBits,
        parity: tokio_serial::Parity,
        config: StreamConfig,
    ) -> ModbusResult<RtuSession<StreamProtocol<tokio_serial::SerialStream>>> {
        let mut builder = tokio_serial::new(port, baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity);
        if let Some(timeout) = config.response_timeout {
            builder = builder.timeout(timeout);
        }

        let serial = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            ModbusError::connection(format!("Failed to open serial port {}: {}", port, e))
        })?;
        info!("Opened serial port {} at {} baud", port, baud_rate);
        Ok(Self::rtu_session(serial, config))
    }

    /// TCP session over an already connected byte stream.
    pub fn tcp_session<S>(stream: S, config: StreamConfig) -> TcpSession<StreamProtocol<S>> {
        TcpSession::new(StreamProtocol::new(stream, config).with_label("TCP"))
    }

    /// TCP session bound to the slave behind the connection.
    pub fn tcp_session_for_slave<S>(
        stream: S,
        slave_address: u8,
        config: StreamConfig,
    ) -> TcpSession<StreamProtocol<S>> {
        TcpSession::with_slave_address(
            StreamProtocol::new(stream, config).with_label("TCP"),
            slave_address,
        )
    }

    /// Connect to `addr` within `connect_timeout`.
    pub async fn connect_tcp<A: ToSocketAddrs>(
        addr: A,
        connect_timeout: Duration,
        config: StreamConfig,
    ) -> ModbusResult<TcpStreamSession> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ModbusError::timeout("TCP connect", connect_timeout.as_millis() as u64)
            })?
            .map_err(|e| ModbusError::connection(format!("TCP connect failed: {}", e)))?;
        stream.set_nodelay(true)?;

        info!("Connected to Modbus TCP slave at {}", stream.peer_addr()?);
        Ok(Self::tcp_session(stream, config))
    }

    /// Blocking counterpart of [`connect_tcp`](SessionFactory::connect_tcp).
    ///
    /// The response timeout of `config` becomes the socket read and write
    /// timeout.
    pub fn connect_tcp_blocking(
        addr: SocketAddr,
        connect_timeout: Duration,
        config: StreamConfig,
    ) -> ModbusResult<TcpSession<StreamProtocol<std::net::TcpStream>>> {
        let stream = std::net::TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| {
                ModbusError::connection(format!("TCP connect to {} failed: {}", addr, e))
            })?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(config.response_timeout)?;
        stream.set_write_timeout(config.response_timeout)?;

        info!("Connected to Modbus TCP slave at {}", addr);
        Ok(Self::tcp_session(stream, config))
    }

    /// Forwarding session over a transport connected to the parent slave.
    pub fn forward_session<P>(
        protocol: P,
        settings: ForwardSettings,
    ) -> ModbusResult<ForwardSession<P>> {
        ForwardSession::new(protocol, settings)
    }

    /// Connect to a gateway and open a forwarding session through it.
    pub async fn connect_forward<A: ToSocketAddrs>(
        addr: A,
        connect_timeout: Duration,
        config: StreamConfig,
        settings: ForwardSettings,
    ) -> ModbusResult<ForwardSession<StreamProtocol<TcpStream>>> {
        // Reject bad settings before dialing
        if settings.parent_slave_address.is_none() {
            return Err(ModbusError::invalid_argument(
                "Parent slave address must be defined",
            ));
        }
        let session = Self::connect_tcp(addr, connect_timeout, config).await?;
        ForwardSession::new(session.into_protocol(), settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::SessionState;
    use std::io::{Read, Write};

    #[test]
    fn test_blocking_tcp_session_round_trip() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let slave = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0u8; 12];
            stream.read_exact(&mut request).unwrap();
            assert_eq!(&request[6..8], &[0x01, 0x03]);
            stream
                .write_all(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x01, 0x03, 0x02, 0x00])
                .unwrap();
        });

        let mut session = SessionFactory::connect_tcp_blocking(
            addr,
            Duration::from_secs(1),
            StreamConfig::default(),
        )
        .unwrap();
        let response = session
            .send_request::<[u8; 2], _>(0x01, 0x03, &[0x00u8, 0x00, 0x00, 0x01])
            .unwrap()
            .expect("response expected");
        assert_eq!(response.into_data(), [0x02, 0x00]);

        slave.join().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result =
            SessionFactory::connect_tcp(addr, Duration::from_secs(1), StreamConfig::default())
                .await;
        assert!(matches!(result, Err(ModbusError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_connect_forward_requires_parent() {
        let result = SessionFactory::connect_forward(
            "127.0.0.1:1",
            Duration::from_millis(100),
            StreamConfig::default(),
            ForwardSettings::new(),
        )
        .await;
        assert!(matches!(result, Err(ModbusError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_connect_forward() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let settings = ForwardSettings::new()
            .with_parent_slave_address(0x01)
            .with_child_slave_address(0x02);
        let (session, accepted) = tokio::join!(
            SessionFactory::connect_forward(
                addr,
                Duration::from_secs(1),
                StreamConfig::default(),
                settings,
            ),
            listener.accept()
        );

        assert!(accepted.is_ok());
        let session = session.unwrap();
        assert_eq!(session.state(), SessionState::Identified);
        assert_eq!(session.parent_slave_address(), 0x01);
    }

    #[test]
    fn test_tcp_session_for_slave() {
        let stream = std::io::Cursor::new(Vec::<u8>::new());
        let session = SessionFactory::tcp_session_for_slave(stream, 0x11, StreamConfig::default());
        assert_eq!(session.slave_address(), Some(0x11));
        assert_eq!(session.next_transaction_id(), 0);
    }
}
