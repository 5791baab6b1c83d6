use kestrel_chain::{block, BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The body of a `getblocks` request.
///
/// Same shape as `getheaders`, but the peer answers with an `inv` of up to
/// 500 block hashes instead of headers.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct GetBlocks {
    /// The sender's best known block hashes, ordered newest to oldest.
    pub block_locator_hashes: Vec<block::Hash>,
    /// The last block to announce; `None` for as many as allowed.
    pub stop_hash: Option<block::Hash>,
}

impl BitcoinDeserialize for GetBlocks {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let block_locator_hashes = Vec::bitcoin_deserialize(&mut reader)?;
        let raw_stop_hash = block::Hash::bitcoin_deserialize(&mut reader)?;
        let stop_hash = if raw_stop_hash.0 == [0u8; 32] {
            None
        } else {
            Some(raw_stop_hash)
        };
        Ok(GetBlocks {
            block_locator_hashes,
            stop_hash,
        })
    }
}

impl BitcoinSerialize for GetBlocks {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_locator_hashes.bitcoin_serialize(&mut target)?;
        match self.stop_hash {
            Some(hash) => hash.bitcoin_serialize(&mut target),
            None => [0u8; 32].bitcoin_serialize(&mut target),
        }
    }
}
