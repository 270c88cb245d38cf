//! CRC-24 frame check sequence
//!
//! The frame trailer is a 24-bit CRC computed MSB-first over header and
//! payload. The algorithm is a plain descriptor so alternative polynomials can
//! be plugged into a [`FrameCodec`](crate::FrameCodec).

use crc::{Algorithm, Crc};

/// FlexRay frame CRC: polynomial 0x5D6DCB, initial value 0xFEDCBA
pub const CRC_24_FLEXRAY: Algorithm<u32> = Algorithm {
    width: 24,
    poly: 0x5D_6D_CB,
    init: 0xFE_DC_BA,
    refin: false,
    refout: false,
    xorout: 0x00_00_00,
    check: 0x79_79_BD,
    residue: 0x00_00_00,
};

/// Mask for the 24 significant bits of a CRC value
pub const CRC_MASK: u32 = 0x00FF_FFFF;

/// Compute a CRC over a header and a payload as one contiguous stream
pub fn checksum(crc: &Crc<u32>, header: &[u8], payload: &[u8]) -> u32 {
    let mut digest = crc.digest();
    digest.update(header);
    digest.update(payload);
    digest.finalize() & CRC_MASK
}

/// Split a CRC into its three big-endian trailer bytes
pub fn to_trailer(crc: u32) -> [u8; 3] {
    [(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]
}

/// Reassemble a CRC from its trailer bytes
pub fn from_trailer(bytes: [u8; 3]) -> u32 {
    (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLEXRAY: Crc<u32> = Crc::<u32>::new(&CRC_24_FLEXRAY);

    #[test]
    fn test_check_value() {
        assert_eq!(FLEXRAY.checksum(b"123456789"), 0x79_79_BD);
    }

    #[test]
    fn test_empty_input_is_initial_value() {
        assert_eq!(checksum(&FLEXRAY, &[], &[]), 0xFE_DC_BA);
    }

    #[test]
    fn test_split_equals_contiguous() {
        let data = b"123456789";
        assert_eq!(checksum(&FLEXRAY, &data[..5], &data[5..]), 0x79_79_BD);
    }

    #[test]
    fn test_trailer_roundtrip() {
        let crc = 0xAF_2A_EC;
        assert_eq!(to_trailer(crc), [0xAF, 0x2A, 0xEC]);
        assert_eq!(from_trailer(to_trailer(crc)), crc);
    }
}
