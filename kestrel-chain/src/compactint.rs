//! The Bitcoin variable-length integer.

use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use byteorder::{LittleEndian, WriteBytesExt};

/// A variable-length integer: one inline byte below `0xFD`, otherwise a tag
/// byte followed by a little-endian `u16`, `u32`, or `u64`.
///
/// Decoding rejects the three non-minimal encodings, so every value has
/// exactly one accepted byte form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactInt(u64);

impl CompactInt {
    /// Wrap a length or count for serialization.
    pub fn from(value: usize) -> CompactInt {
        CompactInt(value as u64)
    }

    /// The wrapped value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The number of bytes `value` occupies when encoded.
    pub fn size(value: usize) -> usize {
        if value < 0xFD {
            1
        } else if value <= u16::MAX as usize {
            3
        } else if value <= u32::MAX as usize {
            5
        } else {
            9
        }
    }
}

impl BitcoinSerialize for CompactInt {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        if self.value() < 0xFD {
            target.write_all(&[self.value() as u8])
        } else if self.value() <= u16::MAX as u64 {
            target.write_all(&[0xFD])?;
            target.write_u16::<LittleEndian>(self.value() as u16)
        } else if self.value() <= u32::MAX as u64 {
            target.write_all(&[0xFE])?;
            target.write_u32::<LittleEndian>(self.value() as u32)
        } else {
            target.write_all(&[0xFF])?;
            target.write_u64::<LittleEndian>(self.value())
        }
    }
}

impl BitcoinDeserialize for CompactInt {
    fn bitcoin_deserialize<R: std::io::Read>(
        mut target: R,
    ) -> Result<CompactInt, SerializationError> {
        let first = u8::bitcoin_deserialize(&mut target)?;
        match first {
            0x00..=0xFC => Ok(CompactInt(first as u64)),
            0xFD => {
                let value = u16::bitcoin_deserialize(&mut target)? as u64;
                if value < 0xFD {
                    return Err(SerializationError::NonCanonicalCompactInt);
                }
                Ok(CompactInt(value))
            }
            0xFE => {
                let value = u32::bitcoin_deserialize(&mut target)? as u64;
                if value <= u16::MAX as u64 {
                    return Err(SerializationError::NonCanonicalCompactInt);
                }
                Ok(CompactInt(value))
            }
            0xFF => {
                let value = u64::bitcoin_deserialize(&mut target)?;
                if value <= u32::MAX as u64 {
                    return Err(SerializationError::NonCanonicalCompactInt);
                }
                Ok(CompactInt(value))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u64) -> Vec<u8> {
        let encoded = CompactInt(value)
            .bitcoin_serialize_to_vec()
            .expect("writing to a vec never fails");
        let decoded = CompactInt::bitcoin_deserialize(&encoded[..]).expect("canonical encoding");
        assert_eq!(decoded.value(), value);
        encoded
    }

    #[test]
    fn boundary_encodings() {
        assert_eq!(roundtrip(0), vec![0x00]);
        assert_eq!(roundtrip(0xFC), vec![0xFC]);
        assert_eq!(roundtrip(0xFD), vec![0xFD, 0xFD, 0x00]);
        assert_eq!(roundtrip(0xFFFF), vec![0xFD, 0xFF, 0xFF]);
        assert_eq!(roundtrip(0x10000), vec![0xFE, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(
            roundtrip(0x1_0000_0000),
            vec![0xFF, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn size_matches_encoding() {
        for &value in &[0u64, 0xFC, 0xFD, 0xFFFF, 0x10000, 0xFFFF_FFFF, 0x1_0000_0000] {
            let encoded = CompactInt(value).bitcoin_serialize_to_vec().unwrap();
            assert_eq!(encoded.len(), CompactInt::size(value as usize));
        }
    }

    #[test]
    fn non_minimal_encodings_rejected() {
        for bytes in &[
            &[0xFD, 0x20, 0x00][..],                                     // 0x20 as u16
            &[0xFE, 0xFF, 0xFF, 0x00, 0x00][..],                         // 0xFFFF as u32
            &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00][..], // u32 max as u64
        ] {
            match CompactInt::bitcoin_deserialize(&bytes[..]) {
                Err(SerializationError::NonCanonicalCompactInt) => {}
                other => panic!("expected NonCanonicalCompactInt, got {:?}", other),
            }
        }
    }

    #[test]
    fn truncated_input_rejected() {
        match CompactInt::bitcoin_deserialize(&[0xFD, 0x01][..]) {
            Err(SerializationError::Truncated) => {}
            other => panic!("expected Truncated, got {:?}", other),
        }
    }
}
