use std::io::{Cursor, Read};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError};
use kestrel_serde_derive::BtcSerialize;

use crate::{cached::Cached, compactint::CompactInt, work::difficulty::CompactDifficulty};

use super::{merkle, Hash, Height};

/// A block header, containing metadata about a block.
///
/// Headers chain backwards: each one names its parent's hash, all the way
/// to the genesis block. An SPV client verifies exactly this structure —
/// the 80 bytes below — and nothing heavier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, BtcSerialize)]
pub struct Header {
    /// The block's version field.
    pub version: u32,

    /// The hash of the previous block, which no previous block can change
    /// without also changing this block's hash.
    pub previous_block_hash: Hash,

    /// The root of the transaction merkle tree, binding the header to the
    /// block's transactions.
    ///
    /// Because of a flaw in the tree construction (CVE-2012-2459), the root
    /// does not always uniquely bind the transaction *list*; callers
    /// comparing roots must also reject duplicate transaction ids.
    pub merkle_root: merkle::Root,

    /// The time the miner started hashing the header (according to the
    /// miner), as a Unix epoch time.
    pub time: DateTime<Utc>,

    /// The compact-form target threshold this header's hash must not
    /// exceed, in the nBits format.
    pub difficulty_threshold: CompactDifficulty,

    /// An arbitrary field miners vary to find a hash under the target.
    pub nonce: u32,

    /// The hash of this header, computed once at deserialization.
    /// Not part of the consensus serialization.
    hash: Cached<Hash>,
}

/// Error type for the non-deterministic header time checks.
#[derive(Error, Debug)]
pub enum BlockTimeError {
    /// The header's time is too far past the local clock.
    #[error("block time {0:?} is more than 2 hours in the future ({1:?}); check this machine's clock")]
    TooFarInFuture(DateTime<Utc>, DateTime<Utc>),
    /// The header's time is not after the median of its ancestors' times.
    #[error("block time {0:?} is not after the median-time-past {1:?}")]
    NotPastMedian(DateTime<Utc>, DateTime<Utc>),
}

impl Header {
    /// The serialized length of a header, in bytes.
    pub const fn len() -> usize {
        80
    }

    /// Assemble a header. The hash cache starts empty and fills on first use.
    pub fn new(
        version: u32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: DateTime<Utc>,
        difficulty_threshold: CompactDifficulty,
        nonce: u32,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            difficulty_threshold,
            nonce,
            hash: Cached::new(),
        }
    }

    /// This header's hash.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    pub(super) fn cached_hash(&self) -> Option<Hash> {
        self.hash.value()
    }

    /// Check that this header's time is no more than two hours past `now`.
    ///
    /// This is a non-deterministic rule: clocks vary between nodes, and a
    /// header rejected now may be accepted later.
    pub fn time_is_valid_at(&self, now: DateTime<Utc>) -> Result<(), BlockTimeError> {
        let two_hours_in_the_future = now
            .checked_add_signed(Duration::hours(2))
            .expect("calculating 2 hours in the future does not overflow");
        if self.time <= two_hours_in_the_future {
            Ok(())
        } else {
            Err(BlockTimeError::TooFarInFuture(
                self.time,
                two_hours_in_the_future,
            ))
        }
    }

    /// Check that this header's time is strictly after the median of its
    /// previous eleven ancestors' times.
    pub fn time_is_past_median(
        &self,
        ancestor_times: &mut Vec<DateTime<Utc>>,
    ) -> Result<(), BlockTimeError> {
        if ancestor_times.is_empty() {
            return Ok(());
        }
        ancestor_times.sort_unstable();
        let median = ancestor_times[ancestor_times.len() / 2];
        if self.time > median {
            Ok(())
        } else {
            Err(BlockTimeError::NotPastMedian(self.time, median))
        }
    }
}

/// Deserializing a header hashes its raw 80 bytes once, so the hash is
/// available for free afterwards.
impl BitcoinDeserialize for Header {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut raw = [0u8; Header::len()];
        reader.read_exact(&mut raw)?;

        let own_hash = Hash(sha256d::digest(&raw));

        let mut src = Cursor::new(&raw);
        Ok(Header {
            version: u32::bitcoin_deserialize(&mut src)?,
            previous_block_hash: Hash::bitcoin_deserialize(&mut src)?,
            merkle_root: merkle::Root::bitcoin_deserialize(&mut src)?,
            time: <DateTime<Utc>>::bitcoin_deserialize(&mut src)?,
            difficulty_threshold: CompactDifficulty::bitcoin_deserialize(&mut src)?,
            nonce: u32::bitcoin_deserialize(&mut src)?,
            hash: Cached::from(own_hash),
        })
    }
}

/// A header with a count of the number of transactions in its block.
///
/// This structure is used in the `headers` network message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedHeader {
    /// The header itself.
    pub header: Header,
    /// The number of transactions in the block, always zero on the wire
    /// today but framed for historical reasons.
    pub transaction_count: usize,
}

impl BitcoinSerialize for CountedHeader {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.bitcoin_serialize(&mut target)?;
        CompactInt::from(self.transaction_count).bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for CountedHeader {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(CountedHeader {
            header: Header::bitcoin_deserialize(&mut reader)?,
            transaction_count: CompactInt::bitcoin_deserialize(&mut reader)?.value() as usize,
        })
    }
}

/// A header whose position in the chain is known.
///
/// `work` accumulates the expected hash count from genesis through this
/// block, which is the quantity chains compete on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    /// The verified header.
    pub header: Header,
    /// Cumulative work from genesis through this header.
    pub chain_work: crate::work::difficulty::Work,
    /// This header's height.
    pub height: Height,
}

impl StoredBlock {
    /// Build the genesis entry for a chain starting at `header`.
    pub fn genesis(header: Header) -> Option<StoredBlock> {
        Some(StoredBlock {
            header,
            chain_work: header.difficulty_threshold.to_work()?,
            height: Height::MIN,
        })
    }

    /// Build the entry for `header` given its parent's entry.
    pub fn child_of(parent: &StoredBlock, header: Header) -> Option<StoredBlock> {
        Some(StoredBlock {
            header,
            chain_work: parent
                .chain_work
                .checked_add(header.difficulty_threshold.to_work()?)?,
            height: parent.height.next()?,
        })
    }

    /// The hash of the stored header.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }
}

impl BitcoinSerialize for StoredBlock {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.bitcoin_serialize(&mut target)?;
        self.chain_work.0.to_le_bytes().as_ref().bitcoin_serialize(&mut target)?;
        self.height.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for StoredBlock {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let header = Header::bitcoin_deserialize(&mut reader)?;
        let work_bytes = <[u8; 16]>::bitcoin_deserialize(&mut reader)?;
        let height = Height::bitcoin_deserialize(&mut reader)?;
        Ok(StoredBlock {
            header,
            chain_work: crate::work::difficulty::Work(u128::from_le_bytes(work_bytes)),
            height,
        })
    }
}
