// src/common/crc.rs

use super::error::Scd4xError;
use crc::{Algorithm, Crc};

/// CRC-8 used by Sensirion sensors on every transferred 16-bit word.
/// Polynomial: 0x31 (x^8 + x^5 + x^4 + 1)
/// Initial Value: 0xFF
/// Input/Output Reflected: false
/// Final XOR: 0x00
/// Check Value: 0xF7 (for "123456789"), same parameters as CRC-8/NRSC-5
pub const SENSIRION_CRC: Algorithm<u8> = Algorithm {
    width: 8,
    poly: 0x31,
    init: 0xFF,
    refin: false,
    refout: false,
    xorout: 0x00,
    check: 0xF7,
    residue: 0x00,
};

const CRC_COMPUTER: Crc<u8> = Crc::<u8>::new(&SENSIRION_CRC);

/// Calculates the CRC-8 of a single big-endian word.
#[inline]
pub fn word_crc(word: [u8; 2]) -> u8 {
    CRC_COMPUTER.checksum(&word)
}

/// Encodes a word for transmission: `[MSB, LSB, CRC]`.
pub fn encode_word(value: u16) -> [u8; 3] {
    let [msb, lsb] = value.to_be_bytes();
    [msb, lsb, word_crc([msb, lsb])]
}

/// Verifies and decodes a received `[MSB, LSB, CRC]` triple.
///
/// # Returns
///
/// * `Ok(value)` if the CRC matches.
/// * `Err(Scd4xError::Crc)` otherwise.
pub fn decode_word<E>(chunk: [u8; 3]) -> Result<u16, Scd4xError<E>>
where
    E: core::fmt::Debug,
{
    let [msb, lsb, received] = chunk;
    let calculated = word_crc([msb, lsb]);
    if calculated == received {
        Ok(u16::from_be_bytes([msb, lsb]))
    } else {
        Err(Scd4xError::Crc {
            expected: received,
            calculated,
        })
    }
}
