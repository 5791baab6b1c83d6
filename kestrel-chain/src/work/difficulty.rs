//! Block difficulty data structures and calculations.
//!
//! The block difficulty "target threshold" is stored in the block header as a
//! 32-bit `CompactDifficulty` (the `nBits` field). The `ExpandedDifficulty`
//! is the full 256-bit form a block hash is compared against, and `Work` is
//! the expected hash count a given target represents, used to pick the best
//! chain.

use crate::{block, parameters::Network, BitcoinDeserialize, BitcoinSerialize, SerializationError};
use primitive_types::U256;

/// The number of blocks per difficulty adjustment period.
pub const RETARGET_INTERVAL: u32 = 2016;

/// The target spacing between blocks, in seconds.
pub const TARGET_SPACING: i64 = 10 * 60;

/// The target duration of one retarget period, in seconds.
pub const TARGET_TIMESPAN: i64 = RETARGET_INTERVAL as i64 * TARGET_SPACING;

/// A 32-bit compact encoding of a 256-bit target: one exponent byte and a
/// 23-bit mantissa (bit 24 is a sign bit, invalid in targets).
#[derive(Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CompactDifficulty(pub u32);

impl std::fmt::Debug for CompactDifficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("CompactDifficulty")
            .field(&format_args!("{:#010x}", self.0))
            .finish()
    }
}

/// A 256-bit target threshold. Block hashes, interpreted as little-endian
/// 256-bit integers, must be less than or equal to this value.
///
/// Note: greater values represent *less* work.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ExpandedDifficulty(U256);

/// The expected number of hash tries needed to find a block at some target,
/// and, summed, the total work of a chain.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Work(pub u128);

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Work")
            .field(&format_args!("{:#x}", self.0))
            .finish()
    }
}

const OFFSET: i32 = 3;
const PRECISION: u32 = 24;
const SIGN_BIT: u32 = 1 << (PRECISION - 1);
const UNSIGNED_MANTISSA_MASK: u32 = SIGN_BIT - 1;

impl CompactDifficulty {
    /// Expand to the 256-bit target, if the encoding is valid.
    ///
    /// Returns `None` for zero or negative mantissas and for encodings whose
    /// shift overflows 256 bits.
    pub fn to_expanded(self) -> Option<ExpandedDifficulty> {
        let exponent = (self.0 >> PRECISION) as i32;
        let mantissa = self.0 & UNSIGNED_MANTISSA_MASK;

        if self.0 & SIGN_BIT != 0 || mantissa == 0 {
            return None;
        }

        // (mantissa * 256^(exponent - 3)), as an exact integer.
        let result = match exponent - OFFSET {
            shift if shift < -3 => return None,
            shift if shift < 0 => U256::from(mantissa) >> (-shift * 8) as usize,
            shift if shift > 29 => return None,
            shift => U256::from(mantissa) << (shift * 8) as usize,
        };

        if result == U256::zero() {
            None
        } else {
            Some(ExpandedDifficulty(result))
        }
    }

    /// The expected work of one block at this target.
    pub fn to_work(self) -> Option<Work> {
        self.to_expanded().map(Work::from)
    }
}

impl ExpandedDifficulty {
    /// The easiest valid target for `network` (the "proof-of-work limit").
    pub fn target_difficulty_limit(network: Network) -> ExpandedDifficulty {
        let limit = match network {
            // 0xffff * 2^208, the expansion of 0x1d00ffff.
            Network::Mainnet | Network::Testnet => U256::from(0xffffu64) << 208,
            // Regtest mines without meaningful work: 0x207fffff.
            Network::Regtest => U256::MAX >> 1,
        };
        // Normalize through the compact form, since the consensus limit is
        // defined by its nBits encoding, which discards low bits.
        ExpandedDifficulty(limit)
            .to_compact()
            .to_expanded()
            .expect("difficulty limits are valid expanded values")
    }

    /// Compress to the nBits form, discarding any precision below the
    /// mantissa's 23 bits.
    pub fn to_compact(self) -> CompactDifficulty {
        let byte_len = (self.0.bits() + 7) / 8;
        let mut exponent = byte_len as u32;
        let mut mantissa = if byte_len <= 3 {
            (self.0.low_u64() << (8 * (3 - byte_len))) as u32
        } else {
            (self.0 >> (8 * (byte_len - 3))).low_u64() as u32
        };

        // If the mantissa's top bit would read as a sign, shift a byte out.
        if mantissa & 0x0080_0000 != 0 {
            mantissa >>= 8;
            exponent += 1;
        }

        CompactDifficulty(mantissa | (exponent << PRECISION))
    }

    /// The raw 256-bit value.
    pub(crate) fn to_u256(self) -> U256 {
        self.0
    }

    pub(crate) fn from_u256(value: U256) -> Self {
        ExpandedDifficulty(value)
    }
}

impl From<ExpandedDifficulty> for Work {
    fn from(expanded: ExpandedDifficulty) -> Self {
        // Work is floor(2^256 / (target + 1)), computed without overflowing
        // as (!target / (target + 1)) + 1.
        let target = expanded.0;
        let work = (!target / (target + 1)) + 1;
        Work(work.as_u128())
    }
}

impl Work {
    /// Checked accumulation of chain work.
    pub fn checked_add(self, rhs: Work) -> Option<Work> {
        self.0.checked_add(rhs.0).map(Work)
    }
}

impl std::ops::Add for Work {
    type Output = Work;

    fn add(self, rhs: Work) -> Work {
        Work(
            self.0
                .checked_add(rhs.0)
                .expect("sums of block works fit u128 until far past year 2100"),
        )
    }
}

/// Block hashes are compared against targets as little-endian 256-bit
/// unsigned integers.
impl PartialEq<ExpandedDifficulty> for block::Hash {
    fn eq(&self, other: &ExpandedDifficulty) -> bool {
        U256::from_little_endian(&self.0) == other.0
    }
}

impl PartialOrd<ExpandedDifficulty> for block::Hash {
    fn partial_cmp(&self, other: &ExpandedDifficulty) -> Option<std::cmp::Ordering> {
        Some(U256::from_little_endian(&self.0).cmp(&other.0))
    }
}

impl PartialEq<block::Hash> for ExpandedDifficulty {
    fn eq(&self, other: &block::Hash) -> bool {
        other == self
    }
}

impl PartialOrd<block::Hash> for ExpandedDifficulty {
    fn partial_cmp(&self, other: &block::Hash) -> Option<std::cmp::Ordering> {
        other
            .partial_cmp(self)
            .map(std::cmp::Ordering::reverse)
    }
}

/// Compute the target for the retarget period following one whose first and
/// last blocks are `actual_timespan` seconds apart.
///
/// The adjustment ratio is clamped to `[1/4, 4]`, and the result never
/// exceeds the network's difficulty limit.
pub fn retarget(
    old_target: ExpandedDifficulty,
    actual_timespan: i64,
    network: Network,
) -> CompactDifficulty {
    let timespan = actual_timespan.clamp(TARGET_TIMESPAN / 4, TARGET_TIMESPAN * 4);

    let limit = ExpandedDifficulty::target_difficulty_limit(network).to_u256();
    let (scaled, overflowed) = old_target.to_u256().overflowing_mul(U256::from(timespan));
    let new_target = if overflowed {
        // The multiply only overflows near the difficulty limit, where the
        // clamp below applies anyway.
        limit
    } else {
        scaled / U256::from(TARGET_TIMESPAN)
    };

    ExpandedDifficulty(std::cmp::min(new_target, limit)).to_compact()
}

impl BitcoinSerialize for CompactDifficulty {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for CompactDifficulty {
    fn bitcoin_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::bitcoin_deserialize(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_mainnet_limit() {
        let limit = CompactDifficulty(0x1d00ffff).to_expanded().unwrap();
        // 0x00000000FFFF0000...0000 big-endian.
        let mut expected = [0u8; 32];
        expected[4] = 0xff;
        expected[5] = 0xff;
        assert_eq!(limit.to_u256(), U256::from_big_endian(&expected));
        assert_eq!(limit.to_compact(), CompactDifficulty(0x1d00ffff));
    }

    #[test]
    fn invalid_compact_forms() {
        // Zero mantissa.
        assert_eq!(CompactDifficulty(0x1d000000).to_expanded(), None);
        // Negative (sign bit set).
        assert_eq!(CompactDifficulty(0x1d80ffff).to_expanded(), None);
        // Exponent shifts the mantissa entirely out of 256 bits.
        assert_eq!(CompactDifficulty(0xff00ffff).to_expanded(), None);
    }

    #[test]
    fn work_of_limit_target() {
        // Work at the mainnet limit is 2^32 / (1 - 2^-32), which floors to
        // 0x100010001.
        let work = CompactDifficulty(0x1d00ffff).to_work().unwrap();
        assert_eq!(work.0, 0x1_0001_0001);
    }

    #[test]
    fn hash_target_ordering() {
        let target = CompactDifficulty(0x1d00ffff).to_expanded().unwrap();
        let low_hash = block::Hash([0u8; 32]);
        let mut high_bytes = [0u8; 32];
        high_bytes[31] = 0xff;
        let high_hash = block::Hash(high_bytes);

        assert!(low_hash < target);
        assert!(high_hash > target);
    }

    #[test]
    fn retarget_is_clamped() {
        let old = CompactDifficulty(0x1b0404cb).to_expanded().unwrap();

        // A 16x-slow period only quadruples the target. Compare compact
        // forms: the retarget result is always nBits-normalized.
        let slow = retarget(old, TARGET_TIMESPAN * 16, Network::Mainnet);
        assert_eq!(
            slow,
            ExpandedDifficulty::from_u256(old.to_u256() * 4u64).to_compact()
        );

        // A 16x-fast period only quarters it.
        let fast = retarget(old, TARGET_TIMESPAN / 16, Network::Mainnet);
        assert_eq!(
            fast,
            ExpandedDifficulty::from_u256(old.to_u256() / 4u64).to_compact()
        );
    }

    #[test]
    fn retarget_unchanged_on_exact_timespan() {
        let old = CompactDifficulty(0x1b0404cb).to_expanded().unwrap();
        let next = retarget(old, TARGET_TIMESPAN, Network::Mainnet);
        assert_eq!(next, old.to_compact());
    }
}
