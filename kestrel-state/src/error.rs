use displaydoc::Display;
use kestrel_chain::block;
use thiserror::Error;

/// Errors raised while verifying or storing headers.
#[derive(Debug, Display, Error)]
pub enum ChainError {
    /// header {0} does not attach to any stored block
    Orphan(block::Hash),
    /// header {0} carries an invalid difficulty encoding
    InvalidDifficulty(block::Hash),
    /// header {0} does not satisfy its own target
    ProofOfWork(block::Hash),
    /// header {hash} has difficulty bits {actual:#010x}, expected {expected:#010x}
    BadRetarget {
        /// The offending header.
        hash: block::Hash,
        /// The nBits the header carried.
        actual: u32,
        /// The nBits required by the adjustment schedule.
        expected: u32,
    },
    /// header {0} fails the timestamp rules: {1}
    Time(block::Hash, #[source] block::BlockTimeError),
    /// header {0} duplicates a stored header
    Duplicate(block::Hash),
    /// a reorganization below the finality horizon was refused at fork height {0:?}
    ReorgTooDeep(block::Height),
    /// the chain head or an ancestor is missing from the database
    Corrupt(&'static str),
    /// database error: {0}
    Database(#[from] sled::Error),
    /// serialization error: {0}
    Serialization(#[from] kestrel_chain::SerializationError),
}
