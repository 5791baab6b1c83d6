//! Definitions of network messages.

use std::sync::Arc;

use kestrel_chain::{
    block::{self, Block},
    transaction::Transaction,
};

use super::inv::InventoryHash;
use super::types::*;
use super::Command;
use crate::meta_addr::MetaAddr;

mod get_blocks;
mod get_headers;
mod merkle_block;
mod version;

pub use get_blocks::GetBlocks;
pub use get_headers::GetHeaders;
pub use merkle_block::MerkleBlockMessage;
pub use version::VersionMessage;

/// A Bitcoin network message.
///
/// This is the internal representation; the 12-byte ascii command string
/// and framing are serialization details handled by the codec, which gives
/// one clearly-defined validation boundary for everything that arrives off
/// a socket.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// A `version` message: the handshake opener, carrying the sender's
    /// capabilities.
    Version(VersionMessage),

    /// A `verack` message, acknowledging a `version`.
    Verack,

    /// A `ping` message with its nonce.
    Ping(Nonce),

    /// A `pong` reply carrying the `ping`'s nonce.
    Pong(Nonce),

    /// A `reject` message: the peer refused one of ours.
    Reject {
        /// The command of the rejected message.
        message: String,
        /// Machine-readable rejection category.
        ccode: RejectReason,
        /// Human-readable detail.
        reason: String,
        /// Hash of the rejected object, when there is one.
        data: Option<[u8; 32]>,
    },

    /// A `getaddr` request for address gossip.
    GetAddr,

    /// An `addr` gossip message.
    Addr(Vec<MetaAddr>),

    /// A `getblocks` request: locator hashes plus optional stop hash; the
    /// peer answers with an `inv` of subsequent block hashes.
    GetBlocks(GetBlocks),

    /// An `inv` message advertising objects the peer has.
    Inv(Vec<InventoryHash>),

    /// A `getheaders` request; the peer answers with `headers`.
    GetHeaders(GetHeaders),

    /// A `headers` message: up to 2000 block headers, each with a
    /// (vestigial) transaction count.
    Headers(Vec<block::CountedHeader>),

    /// A `getdata` request for the content of specific objects.
    GetData(Vec<InventoryHash>),

    /// A `block` message carrying a full block.
    Block(Arc<Block>),

    /// A `tx` message carrying one transaction.
    Tx(Arc<Transaction>),

    /// A `notfound` reply listing requested objects the peer lacks.
    NotFound(Vec<InventoryHash>),

    /// A `mempool` request: advertise your unconfirmed transactions
    /// (filtered through our bloom filter).
    Mempool,

    /// A `filterload` message installing a bloom filter on the connection.
    FilterLoad {
        /// The filter bit field, at most 36,000 bytes.
        filter: Filter,
        /// How many hash functions the filter uses, at most 50.
        hash_functions_count: u32,
        /// The random value mixed into each hash.
        tweak: Tweak,
        /// Flags controlling server-side filter updates on matches.
        flags: u8,
    },

    /// A `filteradd` message inserting one element into the loaded filter.
    FilterAdd {
        /// The element, at most 520 bytes.
        data: Vec<u8>,
    },

    /// A `filterclear` message removing the loaded filter.
    FilterClear,

    /// A `merkleblock` message: a header plus a partial merkle tree proving
    /// which filtered transactions the block contains.
    MerkleBlock(MerkleBlockMessage),

    /// A `feefilter` message: do not relay transactions below this fee
    /// rate (satoshis per kilobyte).
    FeeFilter(u64),

    /// A `sendheaders` request: announce new blocks with `headers` rather
    /// than `inv`.
    SendHeaders,
}

/// Reject reason codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RejectReason {
    Malformed = 0x01,
    Invalid = 0x10,
    Obsolete = 0x11,
    Duplicate = 0x12,
    Nonstandard = 0x40,
    Dust = 0x41,
    InsufficientFee = 0x42,
    Checkpoint = 0x43,
    Other = 0x50,
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.command().name())
    }
}

impl Message {
    /// The command identifying this message on the wire.
    pub fn command(&self) -> Command {
        match self {
            Message::Addr { .. } => Command::Addr,
            Message::Block { .. } => Command::Block,
            Message::FeeFilter { .. } => Command::FeeFilter,
            Message::FilterAdd { .. } => Command::FilterAdd,
            Message::FilterClear => Command::FilterClear,
            Message::FilterLoad { .. } => Command::FilterLoad,
            Message::GetAddr => Command::GetAddr,
            Message::GetBlocks { .. } => Command::GetBlocks,
            Message::GetData { .. } => Command::GetData,
            Message::GetHeaders { .. } => Command::GetHeaders,
            Message::Headers { .. } => Command::Headers,
            Message::Inv { .. } => Command::Inv,
            Message::Mempool => Command::MemPool,
            Message::MerkleBlock { .. } => Command::MerkleBlock,
            Message::NotFound { .. } => Command::NotFound,
            Message::Ping { .. } => Command::Ping,
            Message::Pong { .. } => Command::Pong,
            Message::Reject { .. } => Command::Reject,
            Message::SendHeaders => Command::SendHeaders,
            Message::Tx { .. } => Command::Tx,
            Message::Verack => Command::Verack,
            Message::Version { .. } => Command::Version,
        }
    }
}
