//! # Voltage Modbus Session - Typed Modbus Master Engine
//!
//! A Modbus master built around typed request/response sessions: payloads are
//! plain Rust structs with a compile-time byte layout, frames are built and
//! validated for you, and the medium is anything that implements the small
//! "send request, receive N bytes" transport contract.
//!
//! ## Features
//!
//! - **Typed payloads**: `byte_structure!` structs with per-field endianness
//! - **RTU and TCP framing**: CRC16, MBAP header, echo validation
//! - **Sessions**: RTU, TCP (transaction correlation) and forwarding through a gateway slave
//! - **Listener**: accept slaves that dial in, with an optional handshake
//! - **Blocking and async**: one validation path for both
//!
//! ## Session Overview
//!
//! | Session | Frame | Correlation |
//! |---------|-------|-------------|
//! | [`RtuSession`] | `addr func payload crc16` | slave address, function code, CRC |
//! | [`TcpSession`] | `tid pid len addr func payload` | transaction id, header, echo |
//! | [`ForwardSession`] | inner frame inside a TCP payload | outer envelope only |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use voltage_modbus_session::{byte_structure, ModbusResult, SessionFactory, StreamConfig};
//!
//! byte_structure! {
//!     pub struct ReadRequest {
//!         #[endian(big)]
//!         pub start_address: u16,
//!         #[endian(big)]
//!         pub quantity: u16,
//!     }
//! }
//!
//! byte_structure! {
//!     pub struct TwoRegisters {
//!         pub byte_count: u8,
//!         #[endian(big)]
//!         pub values: [u16; 2],
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut session = SessionFactory::connect_tcp(
//!         "127.0.0.1:502",
//!         Duration::from_secs(5),
//!         StreamConfig::default(),
//!     )
//!     .await?;
//!
//!     let request = ReadRequest { start_address: 0, quantity: 2 };
//!     if let Some(response) = session
//!         .send_request_async::<TwoRegisters, _>(1, 0x03, &request)
//!         .await?
//!     {
//!         println!("Registers: {:?}", response.data().values);
//!     }
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Frame sizes and protocol constants
pub mod constants;

/// Endian-aware payload codec
pub mod structure;

/// CRC16 (Modbus) checksum
pub mod checksum;

/// Request frames and builders
pub mod request;

/// Response frames and validation
pub mod response;

/// Transport contract and stream transport
pub mod transport;

/// Packet logging helpers
pub mod logging;

// ============================================================================
// Sessions
// ============================================================================

/// RTU session
pub mod rtu;

/// TCP session
pub mod tcp;

/// Forwarding (gateway) session
pub mod forward;

/// TCP listener for slaves that connect to the master
pub mod server;

/// Session construction helpers
pub mod factory;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime (users can use voltage_modbus_session::tokio) ===
pub use tokio;

// === Error handling ===
pub use error::{ModbusError, ModbusResult};

// === Payload codec ===
pub use structure::{ByteStructure, Endianness};

// === Frames ===
pub use request::{
    RequestBuilder, RtuRequest, RtuRequestBuilder, TcpRequest, TcpRequestBuilder,
};
pub use response::{Envelope, MbapHeader, Response};

// === Transport ===
pub use transport::{
    AsyncModbusProtocol, ModbusProtocol, StreamConfig, StreamProtocol, TransportStats,
};

// === Sessions ===
pub use factory::SessionFactory;
pub use forward::{ForwardSession, ForwardSettings, SessionState};
pub use rtu::RtuSession;
pub use server::{Handshake, ModbusTcpServer, TcpServerConfig, TcpStreamSession};
pub use tcp::TcpSession;

// === Protocol constants (commonly needed) ===
pub use constants::{
    DEFAULT_FORWARD_FUNCTION_CODE, DEFAULT_TCP_PORT, MAX_PAYLOAD_SIZE, MAX_PDU_SIZE,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus Session v{} - typed Modbus master engine", VERSION)
}
