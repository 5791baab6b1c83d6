//! The transaction merkle tree and its BIP-37 partial form.

use std::io;
use std::iter::FromIterator;

use crate::serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError};
use crate::transaction;

/// The root of a block's transaction merkle tree.
///
/// Leaf nodes are transaction hashes; each internal node is the SHA-256d of
/// its children's concatenation, with an odd node duplicated to pair with
/// itself.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Root(pub [u8; 32]);

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut reversed_bytes = self.0;
        reversed_bytes.reverse();
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(&reversed_bytes))
            .finish()
    }
}

fn hash_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut both = [0u8; 64];
    both[..32].copy_from_slice(left);
    both[32..].copy_from_slice(right);
    sha256d::digest(&both)
}

impl FromIterator<transaction::Hash> for Root {
    fn from_iter<I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = transaction::Hash>,
    {
        let mut layer: Vec<[u8; 32]> = hashes.into_iter().map(|hash| hash.0).collect();
        if layer.is_empty() {
            // An empty block cannot exist; mirror the degenerate convention
            // of hashing nothing so callers get a stable value.
            return Root([0u8; 32]);
        }
        while layer.len() > 1 {
            layer = layer
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [odd] => hash_pair(odd, odd),
                    _ => unreachable!("chunks(2) yields one or two items"),
                })
                .collect();
        }
        Root(layer[0])
    }
}

impl BitcoinSerialize for Root {
    fn bitcoin_serialize<W: io::Write>(&self, target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Root {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::bitcoin_deserialize(reader)?))
    }
}

/// A BIP-37 partial merkle tree, proving that a set of transactions is
/// contained in a block without shipping the block's body.
///
/// The tree is a depth-first traversal encoded as a flag bit per visited
/// node and a hash per terminal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialMerkleTree {
    /// The total number of transactions in the block.
    pub total: u32,
    /// Hashes of terminal traversal nodes.
    pub hashes: Vec<transaction::Hash>,
    /// Traversal flag bits, packed little-endian per byte.
    pub flags: Vec<u8>,
}

impl PartialMerkleTree {
    /// Validate the traversal and extract the matched transaction hashes.
    ///
    /// Returns the root the tree commits to; the caller compares it against
    /// the block header. Malformed traversals (excess hashes, overrun bits,
    /// hostile node counts) are rejected.
    pub fn extract_matches(
        &self,
        matches: &mut Vec<transaction::Hash>,
    ) -> Result<Root, SerializationError> {
        matches.clear();

        if self.total == 0 {
            return Err(SerializationError::Parse(
                "partial merkle tree commits to an empty block",
            ));
        }
        // A block under MAX_BLOCK_BYTES can't fit more transactions.
        if self.total as u64 > super::MAX_BLOCK_BYTES / 60 {
            return Err(SerializationError::Parse(
                "partial merkle tree transaction count exceeds block capacity",
            ));
        }
        if self.hashes.len() > self.total as usize {
            return Err(SerializationError::Parse(
                "partial merkle tree has more hashes than transactions",
            ));
        }

        let mut height = 0u32;
        while self.width(height) > 1 {
            height += 1;
        }

        let mut cursor = Cursor::default();
        let root = self.traverse(height, 0, &mut cursor, matches)?;

        // Every hash must be consumed, and no flag byte may remain entirely
        // unread, or the encoding is not the canonical one for this tree.
        if cursor.hash != self.hashes.len() {
            return Err(SerializationError::Parse(
                "partial merkle tree has unused hashes",
            ));
        }
        if (cursor.bit + 7) / 8 != self.flags.len() {
            return Err(SerializationError::Parse(
                "partial merkle tree has unused flag bits",
            ));
        }

        Ok(Root(root))
    }

    fn width(&self, height: u32) -> u32 {
        (self.total + (1 << height) - 1) >> height
    }

    fn read_bit(&self, cursor: &mut Cursor) -> Result<bool, SerializationError> {
        let byte = self
            .flags
            .get(cursor.bit / 8)
            .ok_or(SerializationError::Parse("partial merkle tree flag overrun"))?;
        let bit = byte >> (cursor.bit % 8) & 1 == 1;
        cursor.bit += 1;
        Ok(bit)
    }

    fn read_hash(&self, cursor: &mut Cursor) -> Result<[u8; 32], SerializationError> {
        let hash = self
            .hashes
            .get(cursor.hash)
            .ok_or(SerializationError::Parse("partial merkle tree hash overrun"))?;
        cursor.hash += 1;
        Ok(hash.0)
    }

    fn traverse(
        &self,
        height: u32,
        pos: u32,
        cursor: &mut Cursor,
        matches: &mut Vec<transaction::Hash>,
    ) -> Result<[u8; 32], SerializationError> {
        let parent_of_match = self.read_bit(cursor)?;

        if height == 0 || !parent_of_match {
            // Terminal node: the hash stands in for its whole subtree.
            let hash = self.read_hash(cursor)?;
            if height == 0 && parent_of_match {
                matches.push(transaction::Hash(hash));
            }
            return Ok(hash);
        }

        let left = self.traverse(height - 1, pos * 2, cursor, matches)?;
        let right = if pos * 2 + 1 < self.width(height - 1) {
            let right = self.traverse(height - 1, pos * 2 + 1, cursor, matches)?;
            // A subtree duplicated to fill an odd level hashes a node with
            // itself, which is the CVE-2012-2459 malleability vector.
            if right == left {
                return Err(SerializationError::Parse(
                    "partial merkle tree contains a duplicated subtree",
                ));
            }
            right
        } else {
            left
        };

        Ok(hash_pair(&left, &right))
    }
}

#[derive(Default)]
struct Cursor {
    bit: usize,
    hash: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_hash(byte: u8) -> transaction::Hash {
        transaction::Hash([byte; 32])
    }

    #[test]
    fn root_of_single_transaction_is_its_hash() {
        let root: Root = vec![tx_hash(7)].into_iter().collect();
        assert_eq!(root.0, [7u8; 32]);
    }

    #[test]
    fn odd_layers_duplicate_last_node() {
        let root3: Root = vec![tx_hash(1), tx_hash(2), tx_hash(3)].into_iter().collect();
        let root4: Root = vec![tx_hash(1), tx_hash(2), tx_hash(3), tx_hash(3)]
            .into_iter()
            .collect();
        assert_eq!(root3, root4);
    }

    #[test]
    fn partial_tree_single_match() {
        // Block of three transactions, middle one matched.
        let txids = vec![tx_hash(1), tx_hash(2), tx_hash(3)];
        let expected_root: Root = txids.clone().into_iter().collect();

        // Hand-built traversal for total=3 with tx 2 matched:
        // root(1) -> left(1) -> [leaf 1 (0), leaf 2 (1)], right(0) = hash34.
        let hash34 = hash_pair(&[3u8; 32], &[3u8; 32]);
        let tree = PartialMerkleTree {
            total: 3,
            hashes: vec![txids[0], txids[1], transaction::Hash(hash34)],
            // Bits in traversal order: 1,1,0,1,0 -> byte 0b01011.
            flags: vec![0b01011],
        };

        let mut matches = Vec::new();
        let root = tree.extract_matches(&mut matches).expect("valid tree");
        assert_eq!(root, expected_root);
        assert_eq!(matches, vec![txids[1]]);
    }

    #[test]
    fn partial_tree_rejects_unused_hashes() {
        let tree = PartialMerkleTree {
            total: 1,
            hashes: vec![tx_hash(1), tx_hash(2)],
            flags: vec![0b1],
        };
        let mut matches = Vec::new();
        assert!(tree.extract_matches(&mut matches).is_err());
    }

    #[test]
    fn partial_tree_rejects_empty_block() {
        let tree = PartialMerkleTree {
            total: 0,
            hashes: vec![],
            flags: vec![],
        };
        let mut matches = Vec::new();
        assert!(tree.extract_matches(&mut matches).is_err());
    }
}
