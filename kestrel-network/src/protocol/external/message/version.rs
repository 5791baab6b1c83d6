use std::net::SocketAddr;

use chrono::{DateTime, TimeZone, Utc};
use kestrel_chain::{block, BitcoinDeserialize, BitcoinSerialize, SerializationError};
use kestrel_serde_derive::{BtcDeserialize, BtcSerialize};

use super::super::types::{Nonce, PeerServices, ProtocolVersion};

/// A `version` message.
///
/// Although this is called `version` in Bitcoin, its role is really
/// analogous to a `ClientHello` in TLS: it opens the handshake and carries
/// the sender's capabilities, and is distinct from a simple version number.
#[derive(Clone, PartialEq, Eq, Debug, BtcSerialize, BtcDeserialize)]
pub struct VersionMessage {
    /// The network version number supported by the sender.
    pub version: ProtocolVersion,

    /// The network services advertised by the sender.
    pub services: PeerServices,

    /// The time when the version message was sent.
    pub timestamp: DateTime<Utc>,

    /// The address of the node receiving this message, with the services
    /// we believe it advertises.
    pub address_recv: (PeerServices, SocketAddr),

    /// The address of the node sending this message, and its services.
    pub address_from: (PeerServices, SocketAddr),

    /// Random per-connection nonce, used to detect connections to self.
    pub nonce: Nonce,

    /// The user agent advertised by the sender.
    pub user_agent: String,

    /// The height of the sender's best chain.
    pub best_block: block::Height,

    /// Whether the remote peer should relay transactions to us before we
    /// load a filter (BIP 37).
    pub relay: bool,
}

impl VersionMessage {
    /// Assemble a version message for an outbound handshake.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: ProtocolVersion,
        their_addr: SocketAddr,
        their_services: PeerServices,
        our_services: PeerServices,
        our_addr: SocketAddr,
        nonce: Nonce,
        user_agent: String,
        best_block: block::Height,
        relay: bool,
    ) -> VersionMessage {
        // Truncate the timestamp to the nearest 5 minutes to stay within
        // the range where remote clock-skew checks ignore us.
        let now = Utc::now().timestamp();
        let timestamp = Utc.timestamp(now - now.rem_euclid(5 * 60), 0);
        VersionMessage {
            version,
            services: our_services,
            timestamp,
            address_recv: (their_services, their_addr),
            address_from: (our_services, our_addr),
            nonce,
            user_agent,
            best_block,
            relay,
        }
    }
}
