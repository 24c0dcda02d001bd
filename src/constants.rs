//! Modbus protocol constants used by the framing engine
//!
//! Frame sizes follow the official Modbus application protocol and the
//! Modbus over serial line specification:
//! - Maximum PDU size: 253 bytes (inherited from RS485 ADU limit of 256 bytes)
//! - RTU ADU: Slave Address(1) + PDU + CRC(2)
//! - TCP ADU: MBAP header(6) + Unit ID(1) + PDU

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header bytes that precede the unit identifier
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) = 6 bytes
pub const MBAP_HEADER_LEN: usize = 6;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum payload bytes following the function code
pub const MAX_PAYLOAD_SIZE: usize = MAX_PDU_SIZE - 1;

/// Slave address + function code, the part of the `length` field that is
/// not payload
pub const ADDRESS_FUNCTION_LEN: usize = 2;

/// CRC16 trailer length
pub const CRC_LEN: usize = 2;

/// Bytes an RTU frame adds around the payload
/// Slave Address(1) + Function Code(1) + CRC(2) = 4 bytes
pub const RTU_FRAME_OVERHEAD: usize = ADDRESS_FUNCTION_LEN + CRC_LEN;

/// Bytes a TCP frame adds around the payload
/// MBAP header(6) + Unit ID(1) + Function Code(1) = 8 bytes
pub const TCP_FRAME_OVERHEAD: usize = MBAP_HEADER_LEN + ADDRESS_FUNCTION_LEN;

// ============================================================================
// Protocol Values
// ============================================================================

/// Protocol identifier carried by every Modbus TCP frame
pub const MODBUS_PROTOCOL_ID: u16 = 0;

/// Broadcast slave address (no response expected)
pub const BROADCAST_ADDRESS: u8 = 0;

/// Function code used by a parent slave to tunnel a child request
///
/// Taken from the user-defined function code range 100-110.
pub const DEFAULT_FORWARD_FUNCTION_CODE: u8 = 0x64;

/// Default time the transport waits for a complete response (milliseconds)
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Read Input Registers (FC04)
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;

/// Write Single Register (FC06)
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;

/// Report Server ID (FC17), commonly used to identify a freshly connected slave
pub const FC_REPORT_SERVER_ID: u8 = 0x11;
