//! Modbus CRC16 used by RTU framing.
//!
//! Polynomial 0xA001 (reflected 0x8005), initial value 0xFFFF, no final XOR.
//! On the wire the checksum is sent low byte first.

use crc::{Crc, CRC_16_MODBUS};

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the CRC16 of `bytes`.
#[inline]
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC_MODBUS.checksum(bytes)
}

/// Compute the CRC16 of `bytes[offset..offset + length]` in wire order
/// (low byte first).
///
/// # Panics
///
/// Panics if the range lies outside `bytes`.
#[inline]
pub fn compute_crc16(bytes: &[u8], offset: usize, length: usize) -> [u8; 2] {
    crc16(&bytes[offset..offset + length]).to_le_bytes()
}

/// Check the trailing two bytes of an RTU frame against the CRC of the rest.
///
/// Frames shorter than the CRC itself never verify.
pub fn verify_crc16(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let body_len = frame.len() - 2;
    compute_crc16(frame, 0, body_len) == frame[body_len..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_crc16_known_request() {
        let frame = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        assert_eq!(crc16(&frame), 0x8776);
        assert_eq!(compute_crc16(&frame, 0, frame.len()), [0x76, 0x87]);
    }

    #[test]
    fn test_crc16_offset_and_length() {
        let buffer = [0xAA, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0xBB];
        assert_eq!(compute_crc16(&buffer, 1, 6), [0x84, 0x0A]);
    }

    #[test]
    fn test_verify_crc16() {
        let frame = [
            0x11, 0x03, 0x06, 0x02, 0x2B, 0x00, 0x00, 0x00, 0x64, 0xC8, 0xBA,
        ];
        assert!(verify_crc16(&frame));

        let mut corrupted = frame;
        corrupted[8] = 0x65;
        assert!(!verify_crc16(&corrupted));

        assert!(!verify_crc16(&[0x01]));
    }

    #[test]
    #[should_panic]
    fn test_compute_crc16_out_of_range() {
        compute_crc16(&[0x01, 0x02], 1, 4);
    }

    proptest! {
        #[test]
        fn prop_appended_crc_verifies(body in proptest::collection::vec(any::<u8>(), 1..256)) {
            let mut frame = body.clone();
            frame.extend_from_slice(&compute_crc16(&body, 0, body.len()));
            prop_assert!(verify_crc16(&frame));
        }

        #[test]
        fn prop_single_byte_change_is_detected(
            body in proptest::collection::vec(any::<u8>(), 1..256),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut frame = body.clone();
            frame.extend_from_slice(&compute_crc16(&body, 0, body.len()));
            let position = index.index(body.len());
            frame[position] ^= flip;
            prop_assert!(!verify_crc16(&frame));
        }
    }
}
