//! Consensus and wire parameters for each Bitcoin network.

mod genesis;

pub use genesis::{genesis_block_header, genesis_hash, GENESIS_PREVIOUS_BLOCK_HASH};

use std::fmt;
use std::str::FromStr;

/// A Bitcoin network kind.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    any(test, feature = "proptest-impl"),
    derive(proptest_derive::Arbitrary)
)]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The public test network (testnet3).
    Testnet,
    /// A local network for integration tests, mined at trivial difficulty.
    Regtest,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Regtest => "regtest",
        })
    }
}

impl FromStr for Network {
    type Err = InvalidNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" | "mainnet" => Ok(Network::Mainnet),
            "test" | "testnet" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            _ => Err(InvalidNetworkError(s.to_owned())),
        }
    }
}

/// An unrecognized network name.
#[derive(thiserror::Error, Debug, Clone)]
#[error("invalid network: {0:?} (expected main, test, or regtest)")]
pub struct InvalidNetworkError(String);

/// The four-byte prefix that frames every message on a network's wire.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl fmt::Debug for Magic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Magic").field(&hex::encode(&self.0)).finish()
    }
}

impl From<Network> for Magic {
    /// The wire magic of each network.
    fn from(network: Network) -> Self {
        match network {
            Network::Mainnet => Magic([0xf9, 0xbe, 0xb4, 0xd9]),
            Network::Testnet => Magic([0x0b, 0x11, 0x09, 0x07]),
            Network::Regtest => Magic([0xfa, 0xbf, 0xb5, 0xda]),
        }
    }
}

impl Network {
    /// The default peer port for this network.
    pub fn default_port(&self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet => 18333,
            Network::Regtest => 18444,
        }
    }

    /// Whether retargeting applies. Regtest never retargets.
    pub fn retargets(&self) -> bool {
        !matches!(self, Network::Regtest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_values() {
        assert_eq!(Magic::from(Network::Mainnet).0, [0xf9, 0xbe, 0xb4, 0xd9]);
        assert_eq!(Magic::from(Network::Testnet).0, [0x0b, 0x11, 0x09, 0x07]);
        assert_eq!(Magic::from(Network::Regtest).0, [0xfa, 0xbf, 0xb5, 0xda]);
    }

    #[test]
    fn network_name_roundtrip() {
        for network in [Network::Mainnet, Network::Testnet, Network::Regtest].iter() {
            assert_eq!(&network.to_string().parse::<Network>().unwrap(), network);
        }
    }
}
