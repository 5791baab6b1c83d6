//! Transparent outputs, inputs, scripts, and addresses.

mod address;
mod script;
mod serialize;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;

pub use address::{hash160, Address};
pub use script::{Script, MAX_SCRIPT_BYTES};
pub use serialize::output_total;

use crate::compactint::CompactInt;
use crate::{transaction, BitcoinSerialize};
use kestrel_serde_derive::BtcSerialize;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

use crate::amount::{Amount, NonNegative};

/// Arbitrary data inserted by miners into a coinbase transaction.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize, BtcSerialize)]
pub struct CoinbaseData(
    /// Invariant: at most 100 bytes. Enforced by the deserializer; locally
    /// constructed coinbases are test-only.
    pub(crate) Vec<u8>,
);

impl AsRef<[u8]> for CoinbaseData {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl CoinbaseData {
    /// The serialized length of this data, including its length prefix.
    pub fn serialized_size(&self) -> usize {
        CompactInt::size(self.0.len()) + self.0.len()
    }
}

impl std::fmt::Debug for CoinbaseData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let escaped = String::from_utf8(
            self.0
                .iter()
                .cloned()
                .flat_map(std::ascii::escape_default)
                .collect(),
        )
        .expect("ascii::escape_default produces utf8");
        f.debug_tuple("CoinbaseData").field(&escaped).finish()
    }
}

/// A reference to a particular output of a particular transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash, BtcSerialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct OutPoint {
    /// The transaction whose output is referenced.
    pub hash: transaction::Hash,

    /// The index of the referenced output within that transaction; the
    /// first output is 0.
    pub index: u32,
}

impl OutPoint {
    /// The serialized length of an outpoint, in bytes.
    #[inline]
    pub const fn len() -> usize {
        36
    }

    /// The null outpoint that marks a coinbase input.
    pub fn null() -> OutPoint {
        OutPoint {
            hash: transaction::Hash([0; 32]),
            index: u32::MAX,
        }
    }

    /// Whether this is the coinbase marker.
    pub fn is_null(&self) -> bool {
        self.hash.0 == [0; 32] && self.index == u32::MAX
    }
}

/// A transparent input to a transaction.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Input {
    /// A spend of an output of a previous transaction.
    PrevOut {
        /// The previous output being spent.
        outpoint: OutPoint,
        /// The script that authorizes spending `outpoint`.
        unlock_script: Script,
        /// The sequence number, used by BIP 68 relative locks and
        /// signalling.
        sequence: u32,
    },
    /// New coins created by the block reward.
    Coinbase {
        /// Free data inserted by the miner. Includes the block height after
        /// BIP 34.
        data: CoinbaseData,
        /// The sequence number.
        sequence: u32,
    },
}

impl Input {
    /// The serialized length of this input, in bytes.
    pub fn len(&self) -> usize {
        match self {
            Input::PrevOut { unlock_script, .. } => {
                OutPoint::len() + unlock_script.serialized_size() + 4
            }
            Input::Coinbase { data, .. } => OutPoint::len() + data.serialized_size() + 4,
        }
    }

    /// The sequence number of this input.
    pub fn sequence(&self) -> u32 {
        match self {
            Input::PrevOut { sequence, .. } | Input::Coinbase { sequence, .. } => *sequence,
        }
    }
}

/// A transparent output of a transaction.
///
/// The coins a wallet "contains" are a subset of the unspent transaction
/// outputs of the chain. Outputs are indivisible: spending one consumes it
/// entirely, returning any difference as change.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, BtcSerialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Output {
    /// The output's value.
    pub value: Amount<NonNegative>,

    /// The lock script: the conditions under which this output can be spent.
    pub lock_script: Script,
}

impl Output {
    /// The serialized length of this output, in bytes.
    pub fn len(&self) -> usize {
        8 + self.lock_script.serialized_size()
    }
}
