//! Script numbers: minimally-encoded signed little-endian integers.
//!
//! Numeric operands are limited to 4 bytes on the stack, but arithmetic
//! results may briefly need 5 bytes (e.g. `OP_ADD` of two maximal values),
//! so the backing type is `i64`.

use crate::ScriptError;

/// A number on the script stack.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScriptNum(pub i64);

impl ScriptNum {
    /// The default operand size limit, in bytes.
    pub const MAX_OPERAND_BYTES: usize = 4;

    /// Decode a stack element as a number of at most `max_size` bytes,
    /// requiring the encoding to be minimal.
    pub fn decode(bytes: &[u8], max_size: usize) -> Result<ScriptNum, ScriptError> {
        if bytes.len() > max_size {
            return Err(ScriptError::NumericRange);
        }
        if let Some(&last) = bytes.last() {
            // A trailing zero byte (ignoring the sign bit) means a shorter
            // encoding was available.
            if last & 0x7f == 0 && (bytes.len() == 1 || bytes[bytes.len() - 2] & 0x80 == 0) {
                return Err(ScriptError::NumericRange);
            }
        }

        let mut result: i64 = 0;
        for (index, &byte) in bytes.iter().enumerate() {
            if index == bytes.len() - 1 {
                // The top bit of the last byte is the sign.
                result |= i64::from(byte & 0x7f) << (8 * index);
                if byte & 0x80 != 0 {
                    result = -result;
                }
            } else {
                result |= i64::from(byte) << (8 * index);
            }
        }
        Ok(ScriptNum(result))
    }

    /// Encode to the minimal byte form.
    pub fn encode(self) -> Vec<u8> {
        let value = self.0;
        if value == 0 {
            return Vec::new();
        }

        let negative = value < 0;
        let mut magnitude = value.unsigned_abs();
        let mut result = Vec::with_capacity(5);
        while magnitude > 0 {
            result.push((magnitude & 0xff) as u8);
            magnitude >>= 8;
        }

        // If the top byte's high bit is occupied, add a sign byte; otherwise
        // fold the sign into the top byte.
        let last = *result.last().expect("nonzero value has bytes");
        if last & 0x80 != 0 {
            result.push(if negative { 0x80 } else { 0x00 });
        } else if negative {
            *result.last_mut().expect("nonzero value has bytes") |= 0x80;
        }
        result
    }

    /// The boolean interpretation of a stack element: false is empty or all
    /// zeroes (allowing negative zero).
    pub fn bytes_as_bool(bytes: &[u8]) -> bool {
        for (index, &byte) in bytes.iter().enumerate() {
            if byte != 0 {
                // Negative zero: sign byte alone at the end.
                if index == bytes.len() - 1 && byte == 0x80 {
                    return false;
                }
                return true;
            }
        }
        false
    }
}

impl From<bool> for ScriptNum {
    fn from(b: bool) -> Self {
        ScriptNum(b as i64)
    }
}

impl From<i64> for ScriptNum {
    fn from(value: i64) -> Self {
        ScriptNum(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: i64) {
        let encoded = ScriptNum(value).encode();
        let decoded = ScriptNum::decode(&encoded, 5).expect("minimal encoding decodes");
        assert_eq!(decoded.0, value, "roundtrip failed for {}", value);
    }

    #[test]
    fn encode_decode_roundtrip() {
        for value in [
            0,
            1,
            -1,
            127,
            -127,
            128,
            -128,
            255,
            256,
            0x7fff,
            -0x7fff,
            0x8000,
            0x7fffffff,
            -0x7fffffff,
        ]
        .iter()
        {
            roundtrip(*value);
        }
    }

    #[test]
    fn zero_encodes_empty() {
        assert!(ScriptNum(0).encode().is_empty());
        assert_eq!(ScriptNum::decode(&[], 4).unwrap(), ScriptNum(0));
    }

    #[test]
    fn sign_byte_layout() {
        assert_eq!(ScriptNum(127).encode(), vec![0x7f]);
        assert_eq!(ScriptNum(128).encode(), vec![0x80, 0x00]);
        assert_eq!(ScriptNum(-128).encode(), vec![0x80, 0x80]);
        assert_eq!(ScriptNum(-1).encode(), vec![0x81]);
    }

    #[test]
    fn non_minimal_rejected() {
        // 1 encoded with a padding zero.
        assert_eq!(
            ScriptNum::decode(&[0x01, 0x00], 4),
            Err(ScriptError::NumericRange)
        );
        // Negative zero.
        assert_eq!(ScriptNum::decode(&[0x80], 4), Err(ScriptError::NumericRange));
        // But 128 requires its second byte.
        assert!(ScriptNum::decode(&[0x80, 0x00], 4).is_ok());
    }

    #[test]
    fn oversize_rejected() {
        assert_eq!(
            ScriptNum::decode(&[1, 2, 3, 4, 5], 4),
            Err(ScriptError::NumericRange)
        );
    }

    #[test]
    fn boolean_interpretation() {
        assert!(!ScriptNum::bytes_as_bool(&[]));
        assert!(!ScriptNum::bytes_as_bool(&[0x00]));
        assert!(!ScriptNum::bytes_as_bool(&[0x00, 0x00]));
        assert!(!ScriptNum::bytes_as_bool(&[0x00, 0x80])); // negative zero
        assert!(ScriptNum::bytes_as_bool(&[0x01]));
        assert!(ScriptNum::bytes_as_bool(&[0x80, 0x00])); // 128
    }
}
