use kestrel_chain::{block, BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The body of a `getheaders` request.
///
/// Note: a protocol version prefix precedes this structure on the wire;
/// the codec writes and validates it.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct GetHeaders {
    /// The sender's best known block hashes, ordered newest to oldest.
    pub block_locator_hashes: Vec<block::Hash>,
    /// The last header to send. `None` (all-zero on the wire) asks for as
    /// many as fit in one message (2000).
    pub stop_hash: Option<block::Hash>,
}

impl BitcoinDeserialize for GetHeaders {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let block_locator_hashes = Vec::bitcoin_deserialize(&mut reader)?;
        let raw_stop_hash = block::Hash::bitcoin_deserialize(&mut reader)?;
        let stop_hash = if raw_stop_hash.0 == [0u8; 32] {
            None
        } else {
            Some(raw_stop_hash)
        };
        Ok(GetHeaders {
            block_locator_hashes,
            stop_hash,
        })
    }
}

impl BitcoinSerialize for GetHeaders {
    fn bitcoin_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.block_locator_hashes.bitcoin_serialize(&mut target)?;
        match self.stop_hash {
            Some(hash) => hash.bitcoin_serialize(&mut target),
            None => [0u8; 32].bitcoin_serialize(&mut target),
        }
    }
}
