//! An address of a potential peer, as carried in `addr` messages.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use kestrel_chain::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use kestrel_serde_derive::{BtcDeserialize, BtcSerialize};

use crate::protocol::external::types::PeerServices;

/// An address with the gossip metadata peers attach to it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, BtcSerialize, BtcDeserialize)]
pub struct MetaAddr {
    /// When the advertising peer last heard from this address.
    ///
    /// Untrusted: peers routinely shade this forward, so the address book
    /// clamps it to its own clock.
    pub last_seen: DateTime<Utc>,

    /// The services the address claimed to offer.
    pub services: PeerServices,

    /// The socket address itself.
    pub addr: SocketAddr,
}

impl MetaAddr {
    /// A locally-sourced address with no gossip metadata.
    pub fn new_local(addr: SocketAddr, services: PeerServices) -> MetaAddr {
        MetaAddr {
            last_seen: Utc::now(),
            services,
            addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn wire_roundtrip() {
        let addr = MetaAddr {
            last_seen: Utc.timestamp(1_500_000_000, 0),
            services: PeerServices::NODE_NETWORK | PeerServices::NODE_BLOOM,
            addr: "203.0.113.6:8333".parse().unwrap(),
        };
        let bytes = addr.bitcoin_serialize_to_vec().unwrap();
        // time + services + ip + port
        assert_eq!(bytes.len(), 4 + 8 + 16 + 2);
        assert_eq!(MetaAddr::bitcoin_deserialize(&bytes[..]).unwrap(), addr);
    }
}
