//! Request frames and their builders.
//!
//! Both transports share the same application fields (slave address, function
//! code, payload) and differ only in the envelope:
//! - **RTU**: `[slave:1][function:1][payload:N][crc16:2, low byte first]`
//! - **TCP**: `[transaction:2 BE][protocol:2 BE][length:2 BE][unit:1][function:1][payload:N]`
//!   with `length = 2 + N`
//!
//! Builders accumulate the fields and produce an immutable request on
//! [`RequestBuilder::build`]. Building copies the accumulated bytes, so a
//! builder can be changed and built again without touching requests built
//! earlier.
//!
//! ```rust
//! use voltage_modbus_session::{RequestBuilder, RtuRequestBuilder};
//!
//! let request = RtuRequestBuilder::new()
//!     .slave_address(0x11)
//!     .function_code(0x03)
//!     .data_bytes(&[0x00, 0x6B, 0x00, 0x03])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     request.as_bytes(),
//!     &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]
//! );
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::checksum::compute_crc16;
use crate::constants::{
    ADDRESS_FUNCTION_LEN, CRC_LEN, MAX_PAYLOAD_SIZE, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID,
};
use crate::error::{ModbusError, ModbusResult};
use crate::structure::{encode, ByteStructure};

/// Application fields accumulated by every builder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameFields {
    slave_address: Option<u8>,
    function_code: Option<u8>,
    data: Vec<u8>,
}

impl FrameFields {
    /// Slave address, if one has been set
    pub fn slave_address(&self) -> Option<u8> {
        self.slave_address
    }

    /// Function code, if one has been set
    pub fn function_code(&self) -> Option<u8> {
        self.function_code
    }

    /// Payload bytes accumulated so far
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Resolve the mandatory fields for building a frame.
    fn require(&self) -> ModbusResult<(u8, u8)> {
        let slave_address = self
            .slave_address
            .ok_or_else(|| ModbusError::invalid_argument("Slave address must be defined"))?;
        let function_code = self
            .function_code
            .ok_or_else(|| ModbusError::invalid_argument("Function code must be defined"))?;

        if self.data.len() > MAX_PAYLOAD_SIZE {
            return Err(ModbusError::invalid_argument(format!(
                "Payload too large: {} bytes (max {})",
                self.data.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        Ok((slave_address, function_code))
    }

    /// Write `[slave][function][payload]` into `frame`.
    fn put_pdu(&self, frame: &mut BytesMut) -> ModbusResult<()> {
        let (slave_address, function_code) = self.require()?;
        frame.put_u8(slave_address);
        frame.put_u8(function_code);
        frame.put_slice(&self.data);
        Ok(())
    }
}

/// Common builder interface of RTU and TCP requests.
pub trait RequestBuilder: Sized {
    /// Request produced by [`build`](RequestBuilder::build)
    type Request;

    /// Fields accumulated so far
    fn fields(&self) -> &FrameFields;

    /// Mutable access to the accumulated fields
    fn fields_mut(&mut self) -> &mut FrameFields;

    /// Set the slave (unit) address.
    fn slave_address(mut self, address: u8) -> Self {
        self.fields_mut().slave_address = Some(address);
        self
    }

    /// Set the function code.
    fn function_code(mut self, code: u8) -> Self {
        self.fields_mut().function_code = Some(code);
        self
    }

    /// Set the payload from a typed structure.
    fn object<D: ByteStructure>(mut self, value: &D) -> Self {
        self.fields_mut().data = encode(value);
        self
    }

    /// Set the payload from raw bytes.
    fn data_bytes(mut self, data: &[u8]) -> Self {
        self.fields_mut().data = data.to_vec();
        self
    }

    /// Produce the final, immutable request.
    fn build(&self) -> ModbusResult<Self::Request>;
}

// ============================================================================
// RTU
// ============================================================================

/// An RTU request frame, CRC included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuRequest {
    frame: Bytes,
}

impl RtuRequest {
    /// Addressed slave.
    pub fn slave_address(&self) -> u8 {
        self.frame[0]
    }

    /// Function code.
    pub fn function_code(&self) -> u8 {
        self.frame[1]
    }

    /// Payload between function code and CRC.
    pub fn payload(&self) -> &[u8] {
        &self.frame[ADDRESS_FUNCTION_LEN..self.frame.len() - CRC_LEN]
    }

    /// CRC16 in wire order (low byte first)
    pub fn crc(&self) -> [u8; 2] {
        let len = self.frame.len();
        [self.frame[len - 2], self.frame[len - 1]]
    }

    /// Bytes ready to send
    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }

    /// Frame bytes, consuming the request.
    pub fn into_bytes(self) -> Bytes {
        self.frame
    }
}

/// Builder for [`RtuRequest`].
#[derive(Debug, Clone, Default)]
pub struct RtuRequestBuilder {
    fields: FrameFields,
}

impl RtuRequestBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build `[slave][function][payload]` without the CRC trailer.
    ///
    /// Used for frames tunnelled inside another envelope that carries its own
    /// integrity guarantees.
    pub fn build_without_crc(&self) -> ModbusResult<Bytes> {
        let mut frame = BytesMut::with_capacity(ADDRESS_FUNCTION_LEN + self.fields.data.len());
        self.fields.put_pdu(&mut frame)?;
        Ok(frame.freeze())
    }
}

impl RequestBuilder for RtuRequestBuilder {
    type Request = RtuRequest;

    fn fields(&self) -> &FrameFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut FrameFields {
        &mut self.fields
    }

    fn build(&self) -> ModbusResult<RtuRequest> {
        let mut frame =
            BytesMut::with_capacity(ADDRESS_FUNCTION_LEN + self.fields.data.len() + CRC_LEN);
        self.fields.put_pdu(&mut frame)?;

        let crc = compute_crc16(&frame, 0, frame.len());
        frame.put_slice(&crc);

        let request = RtuRequest {
            frame: frame.freeze(),
        };
        debug!(
            "RTU request built: slave={} FC={:02X} payload_len={}",
            request.slave_address(),
            request.function_code(),
            request.payload().len()
        );
        Ok(request)
    }
}

// ============================================================================
// TCP
// ============================================================================

/// A Modbus TCP request frame (MBAP header + unit id + PDU).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpRequest {
    frame: Bytes,
}

impl TcpRequest {
    /// MBAP transaction id.
    pub fn transaction_id(&self) -> u16 {
        u16::from_be_bytes([self.frame[0], self.frame[1]])
    }

    /// MBAP protocol id.
    pub fn protocol_id(&self) -> u16 {
        u16::from_be_bytes([self.frame[2], self.frame[3]])
    }

    /// Number of bytes following the length field
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.frame[4], self.frame[5]])
    }

    /// Unit identifier.
    pub fn slave_address(&self) -> u8 {
        self.frame[MBAP_HEADER_LEN]
    }

    /// Function code.
    pub fn function_code(&self) -> u8 {
        self.frame[MBAP_HEADER_LEN + 1]
    }

    /// Payload after the function code.
    pub fn payload(&self) -> &[u8] {
        &self.frame[MBAP_HEADER_LEN + ADDRESS_FUNCTION_LEN..]
    }

    /// Bytes ready to send
    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }

    /// Frame bytes, consuming the request.
    pub fn into_bytes(self) -> Bytes {
        self.frame
    }
}

/// Builder for [`TcpRequest`].
///
/// The `length` header field is always computed from the payload when the
/// request is built.
#[derive(Debug, Clone)]
pub struct TcpRequestBuilder {
    fields: FrameFields,
    transaction_id: u16,
    protocol_id: u16,
}

impl Default for TcpRequestBuilder {
    fn default() -> Self {
        Self {
            fields: FrameFields::default(),
            transaction_id: 0,
            protocol_id: MODBUS_PROTOCOL_ID,
        }
    }
}

impl TcpRequestBuilder {
    /// Builder with protocol id 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transaction identifier.
    pub fn transaction_id(mut self, transaction_id: u16) -> Self {
        self.transaction_id = transaction_id;
        self
    }

    /// Set the protocol identifier (0 for Modbus).
    pub fn protocol_id(mut self, protocol_id: u16) -> Self {
        self.protocol_id = protocol_id;
        self
    }
}

impl RequestBuilder for TcpRequestBuilder {
    type Request = TcpRequest;

    fn fields(&self) -> &FrameFields {
        &self.fields
    }

    fn fields_mut(&mut self) -> &mut FrameFields {
        &mut self.fields
    }

    fn build(&self) -> ModbusResult<TcpRequest> {
        // Validate before touching the header so length never overflows
        self.fields.require()?;
        let length = (ADDRESS_FUNCTION_LEN + self.fields.data.len()) as u16;

        let mut frame = BytesMut::with_capacity(MBAP_HEADER_LEN + length as usize);
        frame.put_u16(self.transaction_id);
        frame.put_u16(self.protocol_id);
        frame.put_u16(length);
        self.fields.put_pdu(&mut frame)?;

        let request = TcpRequest {
            frame: frame.freeze(),
        };
        debug!(
            "TCP request built: tid={} slave={} FC={:02X} length={}",
            request.transaction_id(),
            request.slave_address(),
            request.function_code(),
            request.length()
        );
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    crate::byte_structure! {
        #[derive(Debug, Clone, Copy, PartialEq)]
        struct ReadRegisters {
            #[endian(big)]
            start_address: u16,
            #[endian(big)]
            quantity: u16,
        }
    }

    #[test]
    fn test_rtu_request_from_object() {
        let request = RtuRequestBuilder::new()
            .slave_address(0x11)
            .function_code(0x03)
            .object(&ReadRegisters {
                start_address: 0x006B,
                quantity: 0x0003,
            })
            .build()
            .unwrap();

        assert_eq!(
            request.as_bytes(),
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x76, 0x87]
        );
        assert_eq!(request.slave_address(), 0x11);
        assert_eq!(request.function_code(), 0x03);
        assert_eq!(request.payload(), &[0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(request.crc(), [0x76, 0x87]);
    }

    #[test]
    fn test_rtu_request_without_crc() {
        let frame = RtuRequestBuilder::new()
            .slave_address(0x05)
            .function_code(0x06)
            .data_bytes(&[0x00, 0x01, 0x00, 0x03])
            .build_without_crc()
            .unwrap();

        assert_eq!(&frame[..], &[0x05, 0x06, 0x00, 0x01, 0x00, 0x03]);
    }

    #[test]
    fn test_tcp_request_header() {
        let request = TcpRequestBuilder::new()
            .transaction_id(0x0001)
            .slave_address(0x11)
            .function_code(0x03)
            .data_bytes(&[0x00, 0x6B, 0x00, 0x03])
            .build()
            .unwrap();

        assert_eq!(
            request.as_bytes(),
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]
        );
        assert_eq!(request.transaction_id(), 1);
        assert_eq!(request.protocol_id(), 0);
        assert_eq!(request.length(), 6);
        assert_eq!(request.payload(), &[0x00, 0x6B, 0x00, 0x03]);
    }

    #[test]
    fn test_tcp_request_empty_payload() {
        let request = TcpRequestBuilder::new()
            .slave_address(0x01)
            .function_code(0x11)
            .build()
            .unwrap();

        assert_eq!(request.length(), 2);
        assert!(request.payload().is_empty());
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let result = RtuRequestBuilder::new().function_code(0x03).build();
        assert!(matches!(result, Err(ModbusError::InvalidArgument { .. })));

        let result = TcpRequestBuilder::new().slave_address(0x01).build();
        assert!(matches!(result, Err(ModbusError::InvalidArgument { .. })));
    }

    #[test]
    fn test_oversize_payload_is_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let result = TcpRequestBuilder::new()
            .slave_address(0x01)
            .function_code(0x10)
            .data_bytes(&payload)
            .build();
        assert!(matches!(result, Err(ModbusError::InvalidArgument { .. })));

        let payload = vec![0u8; MAX_PAYLOAD_SIZE];
        let request = RtuRequestBuilder::new()
            .slave_address(0x01)
            .function_code(0x10)
            .data_bytes(&payload)
            .build()
            .unwrap();
        assert_eq!(request.as_bytes().len(), 256);
    }

    #[test]
    fn test_builder_changes_do_not_affect_built_request() {
        let builder = RtuRequestBuilder::new()
            .slave_address(0x01)
            .function_code(0x03)
            .data_bytes(&[0x00, 0x00, 0x00, 0x01]);
        let first = builder.build().unwrap();

        let builder = builder.slave_address(0x02).data_bytes(&[0xFF]);
        let second = builder.build().unwrap();

        assert_eq!(first.slave_address(), 0x01);
        assert_eq!(first.payload(), &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(second.slave_address(), 0x02);
        assert_eq!(second.payload(), &[0xFF]);
    }

    proptest! {
        #[test]
        fn prop_tcp_length_covers_address_function_payload(
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
            transaction_id in any::<u16>(),
        ) {
            let request = TcpRequestBuilder::new()
                .transaction_id(transaction_id)
                .slave_address(0x01)
                .function_code(0x10)
                .data_bytes(&payload)
                .build()
                .unwrap();

            prop_assert_eq!(request.length() as usize, 2 + payload.len());
            prop_assert_eq!(request.as_bytes().len(), MBAP_HEADER_LEN + 2 + payload.len());
            prop_assert_eq!(request.payload(), &payload[..]);
        }

        #[test]
        fn prop_rtu_trailer_is_crc_of_body(
            payload in proptest::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD_SIZE),
        ) {
            let request = RtuRequestBuilder::new()
                .slave_address(0x11)
                .function_code(0x10)
                .data_bytes(&payload)
                .build()
                .unwrap();

            let frame = request.as_bytes();
            let body_len = frame.len() - 2;
            prop_assert_eq!(compute_crc16(frame, 0, body_len), request.crc());
        }
    }
}
