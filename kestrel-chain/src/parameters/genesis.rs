//! Genesis parameters for each Bitcoin network.

use chrono::{TimeZone, Utc};

use crate::{
    block,
    parameters::Network,
    work::difficulty::CompactDifficulty,
};

/// The previous block hash for the genesis block.
///
/// All known networks use the `null` hash (all zeroes) for the parent of
/// the genesis block.
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash([0; 32]);

/// The merkle root shared by every network's genesis block: the hash of the
/// single coinbase transaction carrying the Times headline.
const GENESIS_MERKLE_ROOT: &str =
    "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";

/// Returns the header of the genesis block for `network`.
pub fn genesis_block_header(network: Network) -> block::Header {
    let merkle_root = block::merkle::Root({
        let hash: block::Hash = GENESIS_MERKLE_ROOT
            .parse()
            .expect("hard-coded root parses");
        hash.0
    });

    let (time, difficulty_threshold, nonce) = match network {
        Network::Mainnet => (1231006505, CompactDifficulty(0x1d00ffff), 2083236893),
        Network::Testnet => (1296688602, CompactDifficulty(0x1d00ffff), 414098458),
        Network::Regtest => (1296688602, CompactDifficulty(0x207fffff), 2),
    };

    block::Header::new(
        1,
        GENESIS_PREVIOUS_BLOCK_HASH,
        merkle_root,
        Utc.timestamp(time, 0),
        difficulty_threshold,
        nonce,
    )
}

/// Returns the hash of the genesis block for `network`.
pub fn genesis_hash(network: Network) -> block::Hash {
    match network {
        // bitcoin-cli getblockhash 0
        Network::Mainnet => "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        // bitcoin-cli -testnet getblockhash 0
        Network::Testnet => "000000000933ea01ad0ee984209779baaec3ced90fa3f408719526f8d77f4943",
        // bitcoin-cli -regtest getblockhash 0
        Network::Regtest => "0f9188f13cb7b2c71f2a335e3a4fc328bf5beb436012afca590b1a11466e2206",
    }
    .parse()
    .expect("hard-coded hash parses")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_headers_hash_correctly() {
        kestrel_test::init();

        for network in [Network::Mainnet, Network::Testnet, Network::Regtest].iter() {
            let header = genesis_block_header(*network);
            assert_eq!(
                header.hash(),
                genesis_hash(*network),
                "genesis header for {:?} must hash to its known hash",
                network
            );
        }
    }
}
