use kestrel_chain::{
    block::{self, merkle::PartialMerkleTree},
    transaction, BitcoinDeserialize, BitcoinSerialize, SerializationError,
};
use kestrel_serde_derive::{BtcDeserialize, BtcSerialize};

/// A `merkleblock` message: the filtered-block reply to a `getdata` with
/// inventory type `MSG_FILTERED_BLOCK`.
///
/// Matched transactions follow in separate `tx` messages; this message
/// only proves which txids the block commits to.
#[derive(BtcDeserialize, BtcSerialize, Debug, Clone, PartialEq, Eq)]
pub struct MerkleBlockMessage {
    /// The block's header.
    pub block_header: block::Header,
    /// Total transactions in the block, including unmatched ones.
    pub transaction_count: u32,
    /// The partial merkle tree's terminal hashes.
    pub hashes: Vec<transaction::Hash>,
    /// The partial merkle tree's traversal flags.
    pub flags: Vec<u8>,
}

impl MerkleBlockMessage {
    /// Validate the embedded proof against the header's merkle root and
    /// return the matched transaction ids.
    ///
    /// Rejects malformed traversals and proofs whose root disagrees with
    /// the header, so a lying peer cannot plant transactions in a block.
    pub fn extract_matches(&self) -> Result<Vec<transaction::Hash>, SerializationError> {
        let tree = PartialMerkleTree {
            total: self.transaction_count,
            hashes: self.hashes.clone(),
            flags: self.flags.clone(),
        };
        let mut matches = Vec::new();
        let root = tree.extract_matches(&mut matches)?;
        if root != self.block_header.merkle_root {
            return Err(SerializationError::Parse(
                "merkleblock proof does not match the header's merkle root",
            ));
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_chain::parameters::{genesis_block_header, Network};

    #[test]
    fn single_transaction_block_proof() {
        kestrel_test::init();

        // The genesis block has one transaction: its txid is the merkle
        // root itself. A one-node tree with the match bit set proves it.
        let header = genesis_block_header(Network::Mainnet);
        let txid = transaction::Hash(header.merkle_root.0);

        let message = MerkleBlockMessage {
            block_header: header,
            transaction_count: 1,
            hashes: vec![txid],
            flags: vec![0b1],
        };

        assert_eq!(message.extract_matches().unwrap(), vec![txid]);
    }

    #[test]
    fn wrong_root_rejected() {
        kestrel_test::init();

        let header = genesis_block_header(Network::Mainnet);
        let message = MerkleBlockMessage {
            block_header: header,
            transaction_count: 1,
            hashes: vec![transaction::Hash([0xab; 32])],
            flags: vec![0b1],
        };

        assert!(message.extract_matches().is_err());
    }
}
