//! Typed wrappers over sled's byte-oriented API.
//!
//! Keys and values go through the consensus codec, so anything the chain
//! crate can serialize can be stored without a second encoding scheme.

use kestrel_chain::{BitcoinDeserialize, BitcoinSerialize};

use crate::ChainError;

pub trait TreeExt {
    /// Insert a serializable key/value pair.
    fn st_insert<K, V>(&self, key: &K, value: &V) -> Result<(), ChainError>
    where
        K: BitcoinSerialize,
        V: BitcoinSerialize;

    /// Fetch and decode a value.
    fn st_get<K, V>(&self, key: &K) -> Result<Option<V>, ChainError>
    where
        K: BitcoinSerialize,
        V: BitcoinDeserialize;

    /// Remove a key.
    fn st_remove<K>(&self, key: &K) -> Result<(), ChainError>
    where
        K: BitcoinSerialize;
}

impl TreeExt for sled::Tree {
    fn st_insert<K, V>(&self, key: &K, value: &V) -> Result<(), ChainError>
    where
        K: BitcoinSerialize,
        V: BitcoinSerialize,
    {
        let key = key
            .bitcoin_serialize_to_vec()
            .expect("serializing to a vec never fails");
        let value = value
            .bitcoin_serialize_to_vec()
            .expect("serializing to a vec never fails");
        self.insert(key, value)?;
        Ok(())
    }

    fn st_get<K, V>(&self, key: &K) -> Result<Option<V>, ChainError>
    where
        K: BitcoinSerialize,
        V: BitcoinDeserialize,
    {
        let key = key
            .bitcoin_serialize_to_vec()
            .expect("serializing to a vec never fails");
        match self.get(key)? {
            Some(bytes) => Ok(Some(V::bitcoin_deserialize(&bytes[..])?)),
            None => Ok(None),
        }
    }

    fn st_remove<K>(&self, key: &K) -> Result<(), ChainError>
    where
        K: BitcoinSerialize,
    {
        let key = key
            .bitcoin_serialize_to_vec()
            .expect("serializing to a vec never fails");
        self.remove(key)?;
        Ok(())
    }
}

/// Big-endian height key, so sled's lexicographic order is height order.
#[derive(Copy, Clone, Debug)]
pub struct HeightKey(pub u32);

impl BitcoinSerialize for HeightKey {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        target.write_all(&self.0.to_be_bytes())
    }
}
