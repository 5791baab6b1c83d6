//! Transaction confidence: how sure we are a transaction is part of the
//! best chain.

use std::collections::HashSet;
use std::net::SocketAddr;

use kestrel_chain::{block, transaction};

/// The confidence state machine's current state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfidenceKind {
    /// Nothing is known yet.
    Unknown,
    /// In the best chain.
    Building {
        /// The height of the containing block.
        height: block::Height,
        /// Blocks built on top of the containing block, inclusive: a depth
        /// of 1 means the tip contains the transaction.
        depth: u32,
    },
    /// Seen but unconfirmed.
    Pending,
    /// Overridden by a conflicting transaction in the best chain.
    Dead {
        /// The transaction that overrode this one, once known.
        replacement: Option<transaction::Hash>,
    },
    /// Conflicts with another unconfirmed transaction; neither has won.
    InConflict,
}

/// Where we first learned about a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// We built it.
    Own,
    /// It arrived from the peer network.
    NetworkBroadcast,
    /// Unknown provenance (e.g. loaded from an old wallet file).
    Unknown,
}

/// Confidence data attached to every wallet-known transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxConfidence {
    /// The state machine's current state.
    pub kind: ConfidenceKind,
    /// Where the transaction came from.
    pub source: Source,
    /// Peers that have announced this transaction to us.
    pub seen_by_peers: HashSet<SocketAddr>,
}

impl TxConfidence {
    /// Fresh confidence for a just-learned transaction.
    pub fn new(source: Source) -> TxConfidence {
        TxConfidence {
            kind: ConfidenceKind::Unknown,
            source,
            seen_by_peers: HashSet::new(),
        }
    }

    /// Whether the transaction is in the best chain.
    pub fn is_confirmed(&self) -> bool {
        matches!(self.kind, ConfidenceKind::Building { .. })
    }

    /// The confirmation depth, zero when unconfirmed.
    pub fn depth(&self) -> u32 {
        match self.kind {
            ConfidenceKind::Building { depth, .. } => depth,
            _ => 0,
        }
    }

    /// Record a peer announcing the transaction.
    pub fn mark_seen_by(&mut self, peer: SocketAddr) -> bool {
        self.seen_by_peers.insert(peer)
    }
}
