//! Newtype wrappers for wire-level primitives.

use bitflags::bitflags;
use kestrel_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use kestrel_serde_derive::{BtcDeserialize, BtcSerialize};

/// A protocol version number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, BtcSerialize, BtcDeserialize)]
pub struct ProtocolVersion(pub u32);

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A random nonce, used in `version` (self-connection detection) and
/// `ping`/`pong` (reply matching).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, BtcSerialize, BtcDeserialize)]
pub struct Nonce(pub u64);

impl Nonce {
    /// A fresh random nonce.
    pub fn random() -> Nonce {
        Nonce(rand::random())
    }
}

bitflags! {
    /// The services a node advertises in `version` and `addr` messages.
    #[derive(Default)]
    pub struct PeerServices: u64 {
        /// The node serves full blocks.
        const NODE_NETWORK = 1;
        /// The node serves BIP-37 bloom-filtered connections.
        const NODE_BLOOM = 1 << 2;
        /// The node supports segwit block/tx messages.
        const NODE_WITNESS = 1 << 3;
        /// The node serves the most recent 288+ blocks only.
        const NODE_NETWORK_LIMITED = 1 << 10;
    }
}

impl BitcoinSerialize for PeerServices {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.bits().bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for PeerServices {
    fn bitcoin_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        // Unknown bits are fine: future service flags must not break the
        // handshake.
        Ok(PeerServices::from_bits_truncate(u64::bitcoin_deserialize(
            reader,
        )?))
    }
}

/// The bit field of a loaded BIP-37 filter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Filter(pub Vec<u8>);

/// The per-filter random tweak mixed into each hash function.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BtcSerialize, BtcDeserialize)]
pub struct Tweak(pub u32);
