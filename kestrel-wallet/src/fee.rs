//! Fee policy constants and size estimation.

use std::convert::TryFrom;

use kestrel_chain::amount::{Amount, NonNegative};

/// Outputs below this many satoshis are dust for a P2PKH output: they cost
/// more in fees to spend than they carry.
pub const MIN_NONDUST_OUTPUT: i64 = 546;

/// The minimum fee enforced for transactions with any output below one
/// cent, matching the reference implementation's relay policy.
pub const REFERENCE_DEFAULT_MIN_TX_FEE: i64 = 10_000;

/// The default fee rate when the caller specifies nothing.
pub const DEFAULT_FEE_PER_KB: i64 = 1_000;

/// The priority above which a transaction qualifies for free relay:
/// one coin-day of priority per 250 bytes.
pub const FREE_PRIORITY_THRESHOLD: u64 = 57_600_000;

/// Serialized size overhead of a transaction with no inputs or outputs.
const TX_OVERHEAD_BYTES: usize = 10;
/// Serialized size of one signed P2PKH input.
const P2PKH_INPUT_BYTES: usize = 148;
/// Serialized size of one P2PKH output.
const P2PKH_OUTPUT_BYTES: usize = 34;

/// Estimate the signed size of a P2PKH-input transaction.
pub fn estimate_size(input_count: usize, output_count: usize) -> usize {
    TX_OVERHEAD_BYTES + P2PKH_INPUT_BYTES * input_count + P2PKH_OUTPUT_BYTES * output_count
}

/// The fee for `size` bytes at `fee_per_kb`, charged per started kilobyte.
pub fn fee_for_size(size: usize, fee_per_kb: Amount<NonNegative>) -> Amount<NonNegative> {
    let kilobytes = (size + 999) / 1000;
    let fee = fee_per_kb.as_sat().saturating_mul(kilobytes as i64);
    Amount::try_from(fee.min(kestrel_chain::amount::MAX_MONEY))
        .expect("clamped fee is in range")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sat(value: i64) -> Amount<NonNegative> {
        Amount::try_from(value).unwrap()
    }

    #[test]
    fn fee_rounds_up_per_kilobyte() {
        assert_eq!(fee_for_size(1, sat(1000)), sat(1000));
        assert_eq!(fee_for_size(1000, sat(1000)), sat(1000));
        assert_eq!(fee_for_size(1001, sat(1000)), sat(2000));
        assert_eq!(fee_for_size(226, sat(0)), sat(0));
    }

    #[test]
    fn size_estimate_tracks_shape() {
        // 1-in 2-out P2PKH: the classic payment with change.
        assert_eq!(estimate_size(1, 2), 226);
        assert!(estimate_size(2, 2) > estimate_size(1, 2));
    }
}
