//! Blocks and block-related structures (heights, headers, merkle trees).

mod hash;
mod header;
mod height;

pub mod merkle;

#[cfg(any(test, feature = "proptest-impl"))]
mod arbitrary;
#[cfg(test)]
mod tests;

use std::{io::Read, sync::Arc};

use crate::compactint::CompactInt;
use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use kestrel_serde_derive::BtcSerialize;

pub use hash::Hash;
pub use header::{BlockTimeError, CountedHeader, Header, StoredBlock};
pub use height::Height;

use crate::{fmt::DisplayToDebug, transaction::Transaction};

/// The maximum size of a Bitcoin block, in bytes.
pub const MAX_BLOCK_BYTES: u64 = 4_000_000;

/// A Bitcoin block: a header and the transactions it commits to.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, BtcSerialize)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions.
    pub transactions: Vec<Arc<Transaction>>,
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("hash", &DisplayToDebug(self.hash()))
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

impl Block {
    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from(&self.header)
    }

    /// The merkle root implied by this block's transactions.
    ///
    /// Header verification compares this against `header.merkle_root`; the
    /// two differ on a block whose body was tampered with in transit.
    pub fn computed_merkle_root(&self) -> merkle::Root {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }
}

impl BitcoinDeserialize for Block {
    fn bitcoin_deserialize<R: Read>(reader: R) -> Result<Self, SerializationError> {
        let mut src = reader.take(MAX_BLOCK_BYTES);

        let header = Header::bitcoin_deserialize(&mut src)?;
        let tx_count = CompactInt::bitcoin_deserialize(&mut src)?.value();

        // Sanity-bound the count before allocating: every transaction
        // serializes to at least ~60 bytes, so anything claiming more
        // transactions than fit in a maximal block is hostile.
        if tx_count > MAX_BLOCK_BYTES / 60 {
            return Err(SerializationError::TooLong {
                len: tx_count,
                max: MAX_BLOCK_BYTES / 60,
            });
        }

        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            transactions.push(<Arc<Transaction>>::bitcoin_deserialize(&mut src)?);
        }

        Ok(Block {
            header,
            transactions,
        })
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        (&block.header).into()
    }
}
