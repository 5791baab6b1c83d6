//! Transactions and transaction-related structures.

use crate::cached::Cached;
use crate::compactint::CompactInt;

mod hash;
mod lock_time;
mod serialize;
mod sighash;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;
#[cfg(test)]
mod tests;

pub use hash::Hash;
pub use lock_time::LockTime;
pub use serialize::is_standard_size;
pub use sighash::{SigHash, SighashType};

use crate::transparent;

/// The maximum serialized size of a relayable transaction, in bytes.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;

/// The witness stack of one input: zero or more byte pushes.
pub type Witness = Vec<Vec<u8>>;

/// A Bitcoin transaction.
///
/// A transaction consumes previous outputs and creates new ones; the
/// difference between its input and output values is the miner's fee. The
/// optional segwit witness data rides beside the inputs on the wire but is
/// excluded from the transaction id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction version. Versions greater than 1 mean that BIP 68
    /// sequence semantics apply.
    pub version: i32,
    /// The transaction inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transaction outputs.
    pub outputs: Vec<transparent::Output>,
    /// The earliest block height or time this transaction may confirm at.
    pub lock_time: LockTime,
    /// Per-input witness stacks; empty for a pre-segwit transaction.
    ///
    /// When non-empty, there is exactly one stack per input.
    pub witnesses: Vec<Witness>,
    hash: Cached<Hash>,
}

impl Transaction {
    /// Assemble a transaction. The txid cache fills on first use.
    pub fn new(
        version: i32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: LockTime,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            witnesses: Vec::new(),
            hash: Cached::new(),
        }
    }

    /// Get the id of this transaction: the SHA-256d of its serialization
    /// *without* witness data.
    pub fn hash(&self) -> Hash {
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        Hash::from(self)
    }

    /// Whether any input is a coinbase input.
    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs
            .iter()
            .any(|input| matches!(input, transparent::Input::Coinbase { .. }))
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.contains_coinbase_input()
    }

    /// Whether this transaction carries witness data.
    pub fn has_witness(&self) -> bool {
        self.witnesses.iter().any(|witness| !witness.is_empty())
    }

    /// The serialized length in bytes, including witness data if present.
    pub fn len(&self) -> usize {
        let mut size = 4 + CompactInt::size(self.inputs.len());
        for input in self.inputs.iter() {
            size += input.len();
        }
        size += CompactInt::size(self.outputs.len());
        for output in self.outputs.iter() {
            size += output.len();
        }
        if self.has_witness() {
            size += 2; // marker and flag
            for witness in self.witnesses.iter() {
                size += CompactInt::size(witness.len());
                for item in witness.iter() {
                    size += CompactInt::size(item.len()) + item.len();
                }
            }
        }
        size + 4
    }

    /// Whether the transaction serializes to zero-input nonsense.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    /// The outpoints this transaction spends. Coinbase inputs spend nothing.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = transparent::OutPoint> + '_ {
        self.inputs.iter().filter_map(|input| match input {
            transparent::Input::PrevOut { outpoint, .. } => Some(*outpoint),
            transparent::Input::Coinbase { .. } => None,
        })
    }
}
