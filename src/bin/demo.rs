//! Voltage Modbus Session Demo
//!
//! Demonstrates the voltage_modbus_session library features including:
//! - Typed payloads with per-field endianness (`byte_structure!`)
//! - RTU / TCP frame building
//! - A listener for slaves that dial in, identified by a handshake
//!
//! Usage: cargo run --bin demo [bind_address] [port]
//! Example: cargo run --bin demo 0.0.0.0 5020

use std::time::Duration;

use voltage_modbus_session::constants::FC_READ_HOLDING_REGISTERS;
use voltage_modbus_session::logging::format_hex_packet;
use voltage_modbus_session::structure::encode;
use voltage_modbus_session::{
    byte_structure, Handshake, ModbusResult, ModbusTcpServer, RequestBuilder, RtuRequestBuilder,
    TcpRequestBuilder, TcpStreamSession,
};

byte_structure! {
    #[derive(Debug, Clone, Copy)]
    struct ReadRequest {
        #[endian(big)]
        start_address: u16,
        #[endian(big)]
        quantity: u16,
    }
}

byte_structure! {
    #[derive(Debug, Clone, Copy)]
    struct OneRegister {
        byte_count: u8,
        #[endian(big)]
        value: u16,
    }
}

byte_structure! {
    #[derive(Debug, Clone, Copy)]
    struct TwoRegisters {
        byte_count: u8,
        #[endian(big)]
        values: [u16; 2],
    }
}

/// Unit id used to talk to a slave whose address is not known yet
const UNKNOWN_UNIT: u8 = 0xFF;

/// Register 0 of an unidentified slave holds its slave address.
struct AddressRegisterHandshake;

impl Handshake for AddressRegisterHandshake {
    async fn identify(&self, session: &mut TcpStreamSession) -> ModbusResult<Option<u8>> {
        let request = ReadRequest {
            start_address: 0,
            quantity: 1,
        };
        let response = session
            .send_request_async::<OneRegister, _>(
                UNKNOWN_UNIT,
                FC_READ_HOLDING_REGISTERS,
                &request,
            )
            .await?;

        Ok(response
            .map(|r| r.data().value)
            .filter(|address| (1..=247).contains(address))
            .map(|address| address as u8))
    }
}

async fn poll_slave(mut session: TcpStreamSession) {
    let Some(slave) = session.slave_address() else {
        return;
    };
    let request = ReadRequest {
        start_address: 1,
        quantity: 2,
    };

    for _ in 0..3 {
        match session
            .send_request_async::<TwoRegisters, _>(slave, FC_READ_HOLDING_REGISTERS, &request)
            .await
        {
            Ok(Some(response)) => println!(
                "  📥 slave {} registers 1..2 = {:?} (tid {:?})",
                slave,
                response.data().values,
                response.transaction_id()
            ),
            Ok(None) => println!("  ⏳ slave {} did not respond", slave),
            Err(e) => {
                println!("  ❌ slave {}: {}", slave, e);
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if let Err(e) = session.close().await {
        println!("  ⚠️  closing slave {} failed: {}", slave, e);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🚀 Voltage Modbus Session v{} Demo", voltage_modbus_session::VERSION);
    println!("===================================\n");

    // =========================================================================
    // Part 1: Typed payloads and frames (no connection required)
    // =========================================================================
    println!("📦 Part 1: Typed payloads and frames");
    println!("------------------------------------");

    let request = ReadRequest {
        start_address: 0x006B,
        quantity: 0x0003,
    };
    println!("  Payload {:?} -> {}", request, format_hex_packet(&encode(&request)));

    let rtu = RtuRequestBuilder::new()
        .slave_address(0x11)
        .function_code(FC_READ_HOLDING_REGISTERS)
        .object(&request)
        .build()?;
    println!("  RTU frame: {}", format_hex_packet(rtu.as_bytes()));

    let tcp = TcpRequestBuilder::new()
        .transaction_id(1)
        .slave_address(0x11)
        .function_code(FC_READ_HOLDING_REGISTERS)
        .object(&request)
        .build()?;
    println!("  TCP frame: {}", format_hex_packet(tcp.as_bytes()));

    // =========================================================================
    // Part 2: Listener with handshake
    // =========================================================================
    println!("\n🔌 Part 2: Listener with handshake");
    println!("----------------------------------");

    let args: Vec<String> = std::env::args().collect();
    let address = args.get(1).map(String::as_str).unwrap_or("");
    let port = match args.get(2) {
        Some(port) => port.parse()?,
        None => 5020,
    };

    let mut server = ModbusTcpServer::bind(address, port).await?;
    println!("  Listening on {} (Ctrl-C to stop)", server.local_addr());

    server.wait_for_connections_with_handshake(
        |session| {
            println!("  ✅ slave {:?} identified", session.slave_address());
            tokio::spawn(poll_slave(session));
        },
        AddressRegisterHandshake,
    )?;

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    println!("\n✅ Demo completed");
    Ok(())
}
