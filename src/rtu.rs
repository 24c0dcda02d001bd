//! # RTU session
//!
//! Request/response cycles over a serial-style link. The session has no
//! state besides the transport it owns; RTU links are half-duplex, so every
//! send takes `&mut self` and only one request is ever outstanding.
//!
//! A `None` result means the slave did not answer (expected for broadcast
//! writes) and is not an error.

use tracing::debug;

use crate::error::ModbusResult;
use crate::request::{RequestBuilder, RtuRequest, RtuRequestBuilder};
use crate::response::Response;
use crate::structure::ByteStructure;
use crate::transport::{AsyncModbusProtocol, ModbusProtocol};

/// Modbus RTU session over a transport `P`.
#[derive(Debug)]
pub struct RtuSession<P> {
    protocol: P,
}

impl<P> RtuSession<P> {
    /// Session over `protocol`.
    pub fn new(protocol: P) -> Self {
        Self { protocol }
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
}

fn prepare<D: ByteStructure>(slave_address: u8, function_code: u8, data: &D) -> RtuRequestBuilder {
    RtuRequestBuilder::new()
        .slave_address(slave_address)
        .function_code(function_code)
        .object(data)
}

fn finish<T: ByteStructure>(
    request: &RtuRequest,
    frame: Option<Vec<u8>>,
) -> ModbusResult<Option<Response<T>>> {
    match frame {
        Some(frame) => Response::from_rtu_frame(&frame, request).map(Some),
        None => {
            debug!(
                "RTU slave {} did not respond to FC={:02X}",
                request.slave_address(),
                request.function_code()
            );
            Ok(None)
        }
    }
}

impl<P: ModbusProtocol> RtuSession<P> {
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
        self.send_builder(prepare(slave_address, function_code, data))
    }

    /// Send a pre-populated builder and decode the answer as `T`.
    pub fn send_builder<T: ByteStructure>(
        &mut self,
        builder: RtuRequestBuilder,
    ) -> ModbusResult<Option<Response<T>>> {
        let request = builder.build()?;
        let frame = self
            .protocol
            .send_for_result(request.as_bytes(), Response::<T>::rtu_frame_len())?;
        finish(&request, frame)
    }
}

impl<P: AsyncModbusProtocol> RtuSession<P> {
    /// Async counterpart of [`send_request`](RtuSession::send_request).
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
        let builder = prepare(slave_address, function_code, data);
        self.send_builder_async(builder).await
    }

    /// Async counterpart of [`send_builder`](RtuSession::send_builder).
    pub async fn send_builder_async<T: ByteStructure>(
        &mut self,
        builder: RtuRequestBuilder,
    ) -> ModbusResult<Option<Response<T>>> {
        let request = builder.build()?;
        let frame = self
            .protocol
            .send_for_result_async(request.as_bytes(), Response::<T>::rtu_frame_len())
            .await?;
        finish(&request, frame)
    }
}
