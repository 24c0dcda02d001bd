//! # TCP session
//!
//! One connection, one session. The session owns the transport and the
//! transaction counter: each request gets the current counter value as its
//! transaction id and the counter is advanced (wrapping at 65536) once the
//! request is built. Responses must echo exactly that id.
//!
//! Every send takes `&mut self`, so at most one request is in flight per
//! session on both the blocking and the async path. Share a session between
//! tasks by wrapping it in a mutex.

use tokio::io::AsyncWrite;
use tracing::debug;

use crate::constants::MODBUS_PROTOCOL_ID;
use crate::error::ModbusResult;
use crate::request::{RequestBuilder, TcpRequest, TcpRequestBuilder};
use crate::response::Response;
use crate::structure::ByteStructure;
use crate::transport::{AsyncModbusProtocol, ModbusProtocol, StreamProtocol};

/// Modbus TCP session over a transport `P`.
#[derive(Debug)]
pub struct TcpSession<P> {
    protocol: P,
    transaction_id: u16,
    /// Used for builders that do not carry an address
    slave_address: Option<u8>,
}

impl<P> TcpSession<P> {
    /// Session with transaction id 0 and no bound slave.
    pub fn new(protocol: P) -> Self {
        Self {
            protocol,
            transaction_id: 0,
            slave_address: None,
        }
    }

    /// Session pre-bound to the slave behind the connection.
    pub fn with_slave_address(protocol: P, slave_address: u8) -> Self {
        Self {
            slave_address: Some(slave_address),
            ..Self::new(protocol)
        }
    }

    /// Bound slave address, if any.
    pub fn slave_address(&self) -> Option<u8> {
        self.slave_address
    }

    /// Bind the session to `slave_address`.
    pub fn set_slave_address(&mut self, slave_address: u8) {
        debug!("TCP session bound to slave {}", slave_address);
        self.slave_address = Some(slave_address);
    }

    /// Transaction id the next request will carry.
    pub fn next_transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Underlying transport.
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Mutable access to the underlying transport.
    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Release the transport.
    pub fn into_protocol(self) -> P {
        self.protocol
    }

    /// Stamp the builder with the session's header fields and build it.
    fn prepare(&mut self, builder: TcpRequestBuilder) -> ModbusResult<TcpRequest> {
        let builder = match (builder.fields().slave_address(), self.slave_address) {
            (None, Some(bound)) => builder.slave_address(bound),
            _ => builder,
        };

        let request = builder
            .transaction_id(self.transaction_id)
            .protocol_id(MODBUS_PROTOCOL_ID)
            .build()?;
        self.transaction_id = self.transaction_id.wrapping_add(1);
        Ok(request)
    }
}

fn direct<D: ByteStructure>(slave_address: u8, function_code: u8, data: &D) -> TcpRequestBuilder {
    TcpRequestBuilder::new()
        .slave_address(slave_address)
        .function_code(function_code)
        .object(data)
}

fn finish<T: ByteStructure>(
    request: &TcpRequest,
    frame: Option<Vec<u8>>,
) -> ModbusResult<Option<Response<T>>> {
    match frame {
        Some(frame) => Response::from_tcp_frame(&frame, request).map(Some),
        None => {
            debug!(
                "TCP slave {} did not respond to tid={}",
                request.slave_address(),
                request.transaction_id()
            );
            Ok(None)
        }
    }
}

impl<P: ModbusProtocol> TcpSession<P> {
    /// Send `data` to `slave_address` and decode the answer as `T`.
    pub fn send_request<T, D>(
        &mut self,
        slave_address: u8,
        function_code: u8,
        data: &D,
    ) -> ModbusResult<Option<Response<T>>>
    where
        T: ByteStructure,
        D: ByteStructure,
    {
        self.send_builder(direct(slave_address, function_code, data))
    }

    /// Send a pre-populated builder and decode the answer as `T`.
    ///
    /// The transaction id and protocol id of the builder are overwritten. A
    /// builder without slave address falls back to the bound address.
    pub fn send_builder<T: ByteStructure>(
        &mut self,
        builder: TcpRequestBuilder,
    ) -> ModbusResult<Option<Response<T>>> {
        let request = self.prepare(builder)?;
        let frame = self
            .protocol
            .send_for_result(request.as_bytes(), Response::<T>::tcp_frame_len())?;
        finish(&request, frame)
    }
}

impl<P: AsyncModbusProtocol> TcpSession<P> {
    /// Async counterpart of [`send_request`](TcpSession::send_request).
    pub async fn send_request_async<T, D>(
        &mut self,
        slave_address: u8,
        function_code: u8,
        data: &D,
    ) -> ModbusResult<Option<Response<T>>>
    where
        T: ByteStructure,
        D: ByteStructure,
    {
        let builder = direct(slave_address, function_code, data);
        self.send_builder_async(builder).await
    }

    /// Async counterpart of [`send_builder`](TcpSession::send_builder).
    pub async fn send_builder_async<T: ByteStructure>(
        &mut self,
        builder: TcpRequestBuilder,
    ) -> ModbusResult<Option<Response<T>>> {
        let request = self.prepare(builder)?;
        let frame = self
            .protocol
            .send_for_result_async(request.as_bytes(), Response::<T>::tcp_frame_len())
            .await?;
        finish(&request, frame)
    }
}

impl<S: AsyncWrite + Unpin> TcpSession<StreamProtocol<S>> {
    /// Shut the connection down.
    pub async fn close(&mut self) -> ModbusResult<()> {
        self.protocol.close().await
    }
}
