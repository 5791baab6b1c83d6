//! Networking for Kestrel: the Bitcoin wire protocol, single peer
//! sessions, and the peer group that coordinates chain sync, transaction
//! broadcast, and bloom filtering across its sessions.

#[macro_use]
extern crate serde;

pub mod bloom;
pub mod constants;
mod error;
mod meta_addr;
pub mod peer;
mod peer_group;
pub mod protocol;

pub use error::{HandshakeError, PeerError};
pub use meta_addr::MetaAddr;
pub use peer::{Peer, PeerEvent, PeerEventKind};
pub use peer_group::{
    BroadcastError, BroadcastHandle, NetworkEvent, PeerDiscovery, PeerGroup, StaticDiscovery,
};
pub use protocol::external::{Codec, InventoryHash, Message, VersionMessage};

use std::net::SocketAddr;
use std::time::Duration;

use kestrel_chain::parameters::Network;

/// Peer networking configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The network to speak.
    pub network: Network,
    /// How many simultaneous ready peers to maintain.
    pub target_peer_count: usize,
    /// Addresses to dial before discovery produces anything.
    pub initial_peers: Vec<SocketAddr>,
    /// How long a dial plus version/verack exchange may take.
    pub handshake_timeout: Duration,
    /// How often to ping idle peers.
    pub ping_interval: Duration,
    /// How long a peer may take to answer a ping.
    pub ping_timeout: Duration,
    /// How long the download peer may fail to advance the chain before
    /// being demoted.
    pub stall_timeout: Duration,
    /// The user agent advertised in handshakes.
    pub user_agent: String,
    /// Whether peers should relay transactions to us before a filter is
    /// loaded.
    pub relay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            target_peer_count: 4,
            initial_peers: Vec::new(),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(120),
            ping_timeout: Duration::from_secs(20),
            stall_timeout: Duration::from_secs(60),
            user_agent: constants::USER_AGENT.to_string(),
            relay: false,
        }
    }
}
