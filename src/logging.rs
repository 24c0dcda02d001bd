//! Packet logging helpers.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. Raw frames are dumped at `info` level when packet
//! logging is switched on for a transport.

use tracing::info;

/// Format raw bytes as an upper-case hex string, e.g. `"11 03 00 6B"`.
pub fn format_hex_packet(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log a packet with its direction and transport label.
pub fn log_packet(direction: &str, data: &[u8], protocol: &str) {
    info!(
        "[MODBUS-{}] {} {}",
        protocol,
        direction,
        format_hex_packet(data)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hex_packet() {
        assert_eq!(
            format_hex_packet(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]),
            "11 03 00 6B 00 03"
        );
        assert_eq!(format_hex_packet(&[]), "");
    }
}
