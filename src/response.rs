//! Response frames: expected lengths, validation and decoding.
//!
//! RTU has no length field, so the number of bytes to read is derived from
//! the payload type before the request is sent. The same holds for TCP,
//! where the length is additionally cross-checked against the MBAP header.
//!
//! Validation order follows the envelope from the outside in and the payload
//! is only decoded once every check passed:
//!
//! | Step | RTU | TCP |
//! |------|-----|-----|
//! | 1 | CRC16 of the body equals the trailer | transaction id equals the request's |
//! | 2 | slave address echo | protocol id is 0 |
//! | 3 | function code echo | `length` equals 2 + payload size |
//! | 4 | | slave address and function code echo |
//!
//! CRC and header failures are [`ModbusError::DataCorrupted`]; echo failures
//! are [`ModbusError::MismatchData`].

use tracing::{debug, warn};

use crate::checksum::compute_crc16;
use crate::constants::{
    ADDRESS_FUNCTION_LEN, CRC_LEN, MBAP_HEADER_LEN, MODBUS_PROTOCOL_ID, RTU_FRAME_OVERHEAD,
    TCP_FRAME_OVERHEAD,
};
use crate::error::{ModbusError, ModbusResult};
use crate::request::{RtuRequest, TcpRequest};
use crate::structure::{decode, ByteStructure};

/// Modbus TCP application protocol header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Number of bytes following the length field
    pub length: u16,
}

impl MbapHeader {
    /// Parse the first six bytes of a TCP frame.
    pub fn parse(frame: &[u8]) -> ModbusResult<Self> {
        if frame.len() < MBAP_HEADER_LEN {
            return Err(corrupted(format!(
                "Frame too short for MBAP header: {} bytes",
                frame.len()
            )));
        }

        Ok(Self {
            transaction_id: u16::from_be_bytes([frame[0], frame[1]]),
            protocol_id: u16::from_be_bytes([frame[2], frame[3]]),
            length: u16::from_be_bytes([frame[4], frame[5]]),
        })
    }
}

/// Transport-specific part of a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// RTU trailer, low byte first
    Rtu { crc: [u8; 2] },
    /// TCP header
    Tcp(MbapHeader),
}

/// A validated response carrying a decoded payload of type `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    slave_address: u8,
    function_code: u8,
    data: T,
    envelope: Envelope,
}

impl<T> Response<T> {
    /// Slave address echoed by the response.
    pub fn slave_address(&self) -> u8 {
        self.slave_address
    }

    /// Function code echoed by the response.
    pub fn function_code(&self) -> u8 {
        self.function_code
    }

    /// Decoded payload
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Decoded payload, consuming the response.
    pub fn into_data(self) -> T {
        self.data
    }

    /// Framing the payload arrived in.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// MBAP header of a TCP response
    pub fn mbap(&self) -> Option<&MbapHeader> {
        match &self.envelope {
            Envelope::Tcp(header) => Some(header),
            Envelope::Rtu { .. } => None,
        }
    }

    /// Transaction id of a TCP response
    pub fn transaction_id(&self) -> Option<u16> {
        self.mbap().map(|header| header.transaction_id)
    }
}

impl<T: ByteStructure> Response<T> {
    /// Bytes a valid RTU response for `T` occupies on the wire.
    pub const fn rtu_frame_len() -> usize {
        RTU_FRAME_OVERHEAD + T::SIZE
    }

    /// Bytes a valid TCP response for `T` occupies on the wire.
    pub const fn tcp_frame_len() -> usize {
        TCP_FRAME_OVERHEAD + T::SIZE
    }

    /// Value of the MBAP `length` field of a valid TCP response for `T`.
    pub const fn message_length() -> usize {
        ADDRESS_FUNCTION_LEN + T::SIZE
    }

    /// Validate an RTU frame against the request it answers and decode it.
    pub fn from_rtu_frame(frame: &[u8], request: &RtuRequest) -> ModbusResult<Self> {
        let expected_len = Self::rtu_frame_len();
        if frame.len() != expected_len {
            return Err(corrupted(format!(
                "RTU response length {} does not match expected {}",
                frame.len(),
                expected_len
            )));
        }

        let body_len = frame.len() - CRC_LEN;
        let crc = [frame[body_len], frame[body_len + 1]];
        let computed = compute_crc16(frame, 0, body_len);
        if computed != crc {
            return Err(corrupted(format!(
                "CRC mismatch: computed {:02X} {:02X}, received {:02X} {:02X}",
                computed[0], computed[1], crc[0], crc[1]
            )));
        }

        check_echo(frame[0], frame[1], request.slave_address(), request.function_code())?;

        let data = decode(&frame[ADDRESS_FUNCTION_LEN..body_len])?;
        debug!(
            "RTU response accepted: slave={} FC={:02X} payload_len={}",
            frame[0],
            frame[1],
            T::SIZE
        );

        Ok(Self {
            slave_address: frame[0],
            function_code: frame[1],
            data,
            envelope: Envelope::Rtu { crc },
        })
    }

    /// Validate a TCP frame against the request it answers and decode it.
    pub fn from_tcp_frame(frame: &[u8], request: &TcpRequest) -> ModbusResult<Self> {
        let expected_len = Self::tcp_frame_len();
        if frame.len() != expected_len {
            return Err(corrupted(format!(
                "TCP response length {} does not match expected {}",
                frame.len(),
                expected_len
            )));
        }

        let header = MbapHeader::parse(frame)?;
        if header.transaction_id != request.transaction_id() {
            return Err(corrupted(format!(
                "Transaction id mismatch: expected {}, got {}",
                request.transaction_id(),
                header.transaction_id
            )));
        }
        if header.protocol_id != MODBUS_PROTOCOL_ID {
            return Err(corrupted(format!(
                "Protocol id mismatch: expected {}, got {}",
                MODBUS_PROTOCOL_ID, header.protocol_id
            )));
        }
        if header.length as usize != Self::message_length() {
            return Err(corrupted(format!(
                "Message length mismatch: header declares {}, actual {}",
                header.length,
                Self::message_length()
            )));
        }

        let slave_address = frame[MBAP_HEADER_LEN];
        let function_code = frame[MBAP_HEADER_LEN + 1];
        check_echo(
            slave_address,
            function_code,
            request.slave_address(),
            request.function_code(),
        )?;

        let data = decode(&frame[TCP_FRAME_OVERHEAD..])?;
        debug!(
            "TCP response accepted: tid={} slave={} FC={:02X} length={}",
            header.transaction_id, slave_address, function_code, header.length
        );

        Ok(Self {
            slave_address,
            function_code,
            data,
            envelope: Envelope::Tcp(header),
        })
    }
}

fn check_echo(
    slave_address: u8,
    function_code: u8,
    expected_slave: u8,
    expected_function: u8,
) -> ModbusResult<()> {
    if slave_address != expected_slave {
        return Err(mismatch(format!(
            "Slave address mismatch: expected {}, got {}",
            expected_slave, slave_address
        )));
    }
    if function_code != expected_function {
        return Err(mismatch(format!(
            "Function code mismatch: expected {:02X}, got {:02X}",
            expected_function, function_code
        )));
    }
    Ok(())
}

fn corrupted(message: String) -> ModbusError {
    warn!("Rejecting response: {}", message);
    ModbusError::data_corrupted(message)
}

fn mismatch(message: String) -> ModbusError {
    warn!("Rejecting response: {}", message);
    ModbusError::mismatch_data(message)
}
