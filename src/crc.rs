//! CRC16 for RTU frame integrity
//!
//! Standard Modbus polynomial (0xA001 reflected), table driven through the
//! `crc` crate. The CRC is appended low byte first, which makes the CRC over a
//! complete frame (CRC bytes included) equal to zero.

use crc::{Crc, CRC_16_MODBUS};

use crate::constants::{MIN_RTU_FRAME_SIZE, RTU_CRC_SIZE};

const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Compute the Modbus CRC16 over `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Append the CRC of `buf[..len]` at `buf[len..len + 2]`, low byte first
///
/// Returns the new frame length, or `None` when `buf` has no room for it.
pub fn append_crc(buf: &mut [u8], len: usize) -> Option<usize> {
    let end = len.checked_add(RTU_CRC_SIZE)?;
    if end > buf.len() {
        return None;
    }
    let crc = crc16(&buf[..len]);
    buf[len..end].copy_from_slice(&crc.to_le_bytes());
    Some(end)
}

/// A received frame is valid iff it is long enough and its CRC16 is zero
#[inline]
pub fn is_valid(frame: &[u8]) -> bool {
    frame.len() >= MIN_RTU_FRAME_SIZE && crc16(frame) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vector() {
        // Read holding registers, slave 0x11, address 0x006B, count 3
        let frame = [0x11, 0x03, 0x00, 0x6B, 0x00, 0x03];
        assert_eq!(crc16(&frame), 0x8776);
    }

    #[test]
    fn test_append_low_byte_first() {
        let mut buf = [0u8; 8];
        buf[..6].copy_from_slice(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(append_crc(&mut buf, 6), Some(8));
        assert_eq!(&buf[6..], &[0x76, 0x87]);
        assert!(is_valid(&buf));
    }

    #[test]
    fn test_append_without_room() {
        let mut buf = [0u8; 4];
        assert_eq!(append_crc(&mut buf, 3), None);
    }

    #[test]
    fn test_short_frame_invalid() {
        // CRC of an empty tail is still checked for length first
        let mut buf = [0x01, 0, 0];
        let crc = crc16(&buf[..1]).to_le_bytes();
        buf[1..].copy_from_slice(&crc);
        assert_eq!(crc16(&buf), 0);
        assert!(!is_valid(&buf));
    }

    proptest! {
        #[test]
        fn prop_crc_round_trip(data in proptest::collection::vec(any::<u8>(), 0..254)) {
            let mut buf = data.clone();
            buf.extend_from_slice(&crc16(&data).to_le_bytes());
            prop_assert_eq!(crc16(&buf), 0);
        }

        #[test]
        fn prop_single_bit_flip_detected(
            data in proptest::collection::vec(any::<u8>(), 2..254),
            bit in 0usize..8,
            idx in any::<prop::sample::Index>(),
        ) {
            let mut buf = data.clone();
            buf.extend_from_slice(&crc16(&data).to_le_bytes());
            let i = idx.index(buf.len());
            buf[i] ^= 1 << bit;
            prop_assert_ne!(crc16(&buf), 0);
        }
    }
}
