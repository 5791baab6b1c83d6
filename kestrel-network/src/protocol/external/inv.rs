//! Inventory items for the Bitcoin protocol.

use std::io::{Read, Write};

use kestrel_chain::{
    block,
    serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError},
    transaction,
};

/// An inventory hash which refers to some advertised or requested data.
///
/// Bitcoin calls this an "inventory vector" but it is just a typed hash,
/// not a container, so we do not use that term to avoid confusion with
/// `Vec<T>`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InventoryHash {
    /// An error; data with this type may be ignored.
    Error,
    /// A hash of a transaction.
    Tx(transaction::Hash),
    /// A hash of a block.
    Block(block::Hash),
    /// A hash of a block header, requesting a `merkleblock` reply.
    ///
    /// Only meaningful in `getdata`, and only once a bloom filter has been
    /// loaded on the connection.
    FilteredBlock(block::Hash),
}

impl From<transaction::Hash> for InventoryHash {
    fn from(tx: transaction::Hash) -> InventoryHash {
        InventoryHash::Tx(tx)
    }
}

impl From<block::Hash> for InventoryHash {
    fn from(hash: block::Hash) -> InventoryHash {
        InventoryHash::Block(hash)
    }
}

impl InventoryHash {
    /// The hash inside, regardless of its type.
    pub fn hash_bytes(&self) -> [u8; 32] {
        match self {
            InventoryHash::Error => [0; 32],
            InventoryHash::Tx(hash) => hash.0,
            InventoryHash::Block(hash) | InventoryHash::FilteredBlock(hash) => hash.0,
        }
    }
}

impl BitcoinSerialize for InventoryHash {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        let (code, bytes) = match *self {
            InventoryHash::Error => (0u32, [0; 32]),
            InventoryHash::Tx(hash) => (1, hash.0),
            InventoryHash::Block(hash) => (2, hash.0),
            InventoryHash::FilteredBlock(hash) => (3, hash.0),
        };
        code.bitcoin_serialize(&mut writer)?;
        bytes.bitcoin_serialize(&mut writer)?;
        Ok(())
    }
}

impl BitcoinDeserialize for InventoryHash {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let code = u32::bitcoin_deserialize(&mut reader)?;
        let bytes = <[u8; 32]>::bitcoin_deserialize(&mut reader)?;
        match code {
            0 => Ok(InventoryHash::Error),
            1 => Ok(InventoryHash::Tx(transaction::Hash(bytes))),
            2 => Ok(InventoryHash::Block(block::Hash(bytes))),
            3 => Ok(InventoryHash::FilteredBlock(block::Hash(bytes))),
            _ => Err(SerializationError::Parse("invalid inventory code")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let items = vec![
            InventoryHash::Error,
            InventoryHash::Tx(transaction::Hash([1; 32])),
            InventoryHash::Block(block::Hash([2; 32])),
            InventoryHash::FilteredBlock(block::Hash([3; 32])),
        ];
        let bytes = items.bitcoin_serialize_to_vec().unwrap();
        let parsed = <Vec<InventoryHash>>::bitcoin_deserialize(&bytes[..]).unwrap();
        assert_eq!(items, parsed);
    }
}
