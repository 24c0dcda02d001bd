//! # Forwarding (gateway) session
//!
//! ```text
//! master ---outer TCP request---> parent slave ---inner request---> child slave
//! master <------- response ------ parent slave <---- response ----- child slave
//! ```
//!
//! The inner request `[child][function][payload]` travels as the payload of
//! an outer TCP request addressed to the parent slave with the forwarding
//! function code. The parent relays whatever the child answers; only the
//! outer envelope is validated here, the relayed child frame is handed back
//! as the decoded payload.
//!
//! ## Lifecycle
//!
//! | State | Entered by | Sending |
//! |-------|------------|---------|
//! | `Unidentified` | no child address configured | builders with a slave address |
//! | `Identified` | child address configured, `identify` | child address wins |
//! | `Expired` | `dispose`, `close` | always `InvalidOperation` |
//!
//! See [`identify`](ForwardSession::identify), [`dispose`](ForwardSession::dispose)
//! and [`close`](ForwardSession::close).
//!
//! `Expired` is terminal; the inner TCP session is dropped on entering it.

use bytes::Bytes;
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::constants::DEFAULT_FORWARD_FUNCTION_CODE;
use crate::error::{ModbusError, ModbusResult};
use crate::request::{RequestBuilder, RtuRequestBuilder, TcpRequestBuilder};
use crate::response::Response;
use crate::structure::ByteStructure;
use crate::tcp::TcpSession;
use crate::transport::{AsyncModbusProtocol, ModbusProtocol, StreamProtocol};

/// Forwarding session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardSettings {
    /// Gateway slave, required
    pub parent_slave_address: Option<u8>,
    /// Slave behind the gateway; `None` starts the session unidentified
    pub child_slave_address: Option<u8>,
    /// Function code of the outer request
    pub parent_function_code: u8,
    /// Append a CRC16 trailer to the tunnelled frame
    pub append_inner_crc: bool,
}

impl Default for ForwardSettings {
    fn default() -> Self {
        Self {
            parent_slave_address: None,
            child_slave_address: None,
            parent_function_code: DEFAULT_FORWARD_FUNCTION_CODE,
            append_inner_crc: false,
        }
    }
}

impl ForwardSettings {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the gateway slave.
    pub fn with_parent_slave_address(mut self, address: u8) -> Self {
        self.parent_slave_address = Some(address);
        self
    }

    /// Address of the slave behind the gateway.
    pub fn with_child_slave_address(mut self, address: u8) -> Self {
        self.child_slave_address = Some(address);
        self
    }

    /// Function code wrapping forwarded frames.
    pub fn with_parent_function_code(mut self, code: u8) -> Self {
        self.parent_function_code = code;
        self
    }

    /// Append a CRC16 to the inner frame.
    pub fn with_inner_crc(mut self, enabled: bool) -> Self {
        self.append_inner_crc = enabled;
        self
    }
}

/// Observable lifecycle state of a [`ForwardSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Unidentified,
    Identified,
    Expired,
}

enum Lifecycle<P> {
    Unidentified(TcpSession<P>),
    Identified { child: u8, session: TcpSession<P> },
    Expired,
}

/// Session tunnelling requests to a child slave through a parent gateway.
pub struct ForwardSession<P> {
    lifecycle: Lifecycle<P>,
    parent_slave_address: u8,
    parent_function_code: u8,
    append_inner_crc: bool,
}

impl<P> std::fmt::Debug for ForwardSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardSession")
            .field("state", &self.state())
            .field("parent_slave_address", &self.parent_slave_address)
            .field("child_slave_address", &self.child_slave_address())
            .field("parent_function_code", &self.parent_function_code)
            .finish()
    }
}

impl<P> ForwardSession<P> {
    /// Create a session over the transport connected to the parent slave.
    ///
    /// Fails with `InvalidArgument` if the settings carry no parent address.
    pub fn new(protocol: P, settings: ForwardSettings) -> ModbusResult<Self> {
        let parent = settings.parent_slave_address.ok_or_else(|| {
            ModbusError::invalid_argument("Parent slave address must be defined")
        })?;

        let session = TcpSession::with_slave_address(protocol, parent);
        let lifecycle = match settings.child_slave_address {
            Some(child) => Lifecycle::Identified { child, session },
            None => Lifecycle::Unidentified(session),
        };

        Ok(Self {
            lifecycle,
            parent_slave_address: parent,
            parent_function_code: settings.parent_function_code,
            append_inner_crc: settings.append_inner_crc,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        match self.lifecycle {
            Lifecycle::Unidentified(_) => SessionState::Unidentified,
            Lifecycle::Identified { .. } => SessionState::Identified,
            Lifecycle::Expired => SessionState::Expired,
        }
    }

    /// Address of the gateway slave.
    pub fn parent_slave_address(&self) -> u8 {
        self.parent_slave_address
    }

    /// Child address while identified.
    pub fn child_slave_address(&self) -> Option<u8> {
        match self.lifecycle {
            Lifecycle::Identified { child, .. } => Some(child),
            _ => None,
        }
    }

    /// Bind the session to a child slave, replacing any previous one.
    pub fn identify(&mut self, child_slave_address: u8) -> ModbusResult<()> {
        self.lifecycle = match std::mem::replace(&mut self.lifecycle, Lifecycle::Expired) {
            Lifecycle::Unidentified(session) | Lifecycle::Identified { session, .. } => {
                Lifecycle::Identified {
                    child: child_slave_address,
                    session,
                }
            }
            Lifecycle::Expired => return Err(expired()),
        };
        debug!(
            "Forward session identified: parent={} child={}",
            self.parent_slave_address, child_slave_address
        );
        Ok(())
    }

    /// Expire the session and drop the inner TCP session. Idempotent.
    pub fn dispose(&mut self) {
        if !matches!(self.lifecycle, Lifecycle::Expired) {
            debug!("Forward session via parent {} expired", self.parent_slave_address);
        }
        self.lifecycle = Lifecycle::Expired;
    }

    /// Resolve the inner session and wrap the inner request into the outer one.
    fn route(
        &mut self,
        inner: RtuRequestBuilder,
    ) -> ModbusResult<(&mut TcpSession<P>, TcpRequestBuilder)> {
        let (session, inner) = match &mut self.lifecycle {
            Lifecycle::Expired => return Err(expired()),
            Lifecycle::Unidentified(session) => {
                if inner.fields().slave_address().is_none() {
                    return Err(ModbusError::invalid_operation(
                        "Child slave address must be defined before the session is identified",
                    ));
                }
                (session, inner)
            }
            Lifecycle::Identified { child, session } => (session, inner.slave_address(*child)),
        };

        let inner_frame: Bytes = if self.append_inner_crc {
            inner.build()?.into_bytes()
        } else {
            inner.build_without_crc()?
        };
        debug!(
            "Forwarding {} byte frame to child {} via parent {} FC={:02X}",
            inner_frame.len(),
            inner_frame[0],
            self.parent_slave_address,
            self.parent_function_code
        );

        let outer = TcpRequestBuilder::new()
            .slave_address(self.parent_slave_address)
            .function_code(self.parent_function_code)
            .data_bytes(&inner_frame);
        Ok((session, outer))
    }
}

fn expired() -> ModbusError {
    ModbusError::invalid_operation("This session already expired")
}

fn shorthand<D: ByteStructure>(function_code: u8, data: &D) -> RtuRequestBuilder {
    RtuRequestBuilder::new()
        .function_code(function_code)
        .object(data)
}

impl<P: ModbusProtocol> ForwardSession<P> {
    /// Send `data` to the identified child.
    ///
    /// Fails with `InvalidOperation` unless the session is `Identified`.
    pub fn send_request<T, D>(
        &mut self,
        function_code: u8,
        data: &D,
    ) -> ModbusResult<Option<Response<T>>>
    where
        T: ByteStructure,
        D: ByteStructure,
    {
        self.send_builder(shorthand(function_code, data))
    }

    /// Tunnel a pre-populated inner request to the child.
    pub fn send_builder<T: ByteStructure>(
        &mut self,
        builder: RtuRequestBuilder,
    ) -> ModbusResult<Option<Response<T>>> {
        let (session, outer) = self.route(builder)?;
        session.send_builder(outer)
    }
}

impl<P: AsyncModbusProtocol> ForwardSession<P> {
    /// Async counterpart of [`send_request`](ForwardSession::send_request).
    pub async fn send_request_async<T, D>(
        &mut self,
        function_code: u8,
        data: &D,
    ) -> ModbusResult<Option<Response<T>>>
    where
        T: ByteStructure,
        D: ByteStructure,
    {
        let builder = shorthand(function_code, data);
        self.send_builder_async(builder).await
    }

    /// Async counterpart of [`send_builder`](ForwardSession::send_builder).
    pub async fn send_builder_async<T: ByteStructure>(
        &mut self,
        builder: RtuRequestBuilder,
    ) -> ModbusResult<Option<Response<T>>> {
        let (session, outer) = self.route(builder)?;
        session.send_builder_async(outer).await
    }
}

impl<S: AsyncWrite + Unpin> ForwardSession<StreamProtocol<S>> {
    /// Shut the connection to the parent down and expire the session.
    pub async fn close(&mut self) -> ModbusResult<()> {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Expired) {
            Lifecycle::Unidentified(mut session) | Lifecycle::Identified { mut session, .. } => {
                debug!("Forward session via parent {} closed", self.parent_slave_address);
                session.close().await
            }
            Lifecycle::Expired => Ok(()),
        }
    }
}
