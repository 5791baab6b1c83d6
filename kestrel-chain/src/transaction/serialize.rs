//! Wire serialization for transactions, including the segwit extended
//! format (marker `0x00`, flag `0x01`, per-input witness stacks).

use std::io::{self, Read};

use crate::cached::Cached;
use crate::compactint::CompactInt;
use crate::serialization::{
    read_limited_bytes, BitcoinDeserialize, BitcoinSerialize, SerializationError,
};
use crate::transparent;

use super::{Hash, LockTime, Transaction, Witness, MAX_STANDARD_TX_SIZE};

/// The maximum size a transaction decode will consume: one full block.
const MAX_TX_BYTES: u64 = crate::block::MAX_BLOCK_BYTES;

/// The maximum size of a single witness stack item, in bytes.
const MAX_WITNESS_ITEM_BYTES: u64 = 11_000;

impl Transaction {
    /// Serialize in the legacy layout, excluding witness data.
    ///
    /// This is the byte stream the transaction id commits to.
    pub fn serialize_without_witness<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.version.bitcoin_serialize(&mut target)?;
        self.inputs.bitcoin_serialize(&mut target)?;
        self.outputs.bitcoin_serialize(&mut target)?;
        self.lock_time.bitcoin_serialize(&mut target)
    }
}

impl BitcoinSerialize for Transaction {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        if !self.has_witness() {
            return self.serialize_without_witness(target);
        }

        self.version.bitcoin_serialize(&mut target)?;
        // Segwit marker and flag. The marker is a zero where the input count
        // would sit, which no legacy transaction can produce.
        target.write_all(&[0x00, 0x01])?;
        self.inputs.bitcoin_serialize(&mut target)?;
        self.outputs.bitcoin_serialize(&mut target)?;
        for witness in self.witnesses.iter() {
            witness.bitcoin_serialize(&mut target)?;
        }
        self.lock_time.bitcoin_serialize(&mut target)
    }
}

fn read_inputs<R: Read>(
    mut reader: R,
    count: u64,
) -> Result<Vec<transparent::Input>, SerializationError> {
    if count > MAX_TX_BYTES / transparent::OutPoint::len() as u64 {
        return Err(SerializationError::TooLong {
            len: count,
            max: MAX_TX_BYTES / transparent::OutPoint::len() as u64,
        });
    }
    let mut inputs = Vec::with_capacity(std::cmp::min(count as usize, 1024));
    for _ in 0..count {
        inputs.push(transparent::Input::bitcoin_deserialize(&mut reader)?);
    }
    Ok(inputs)
}

fn read_witness<R: Read>(mut reader: R) -> Result<Witness, SerializationError> {
    let item_count = CompactInt::bitcoin_deserialize(&mut reader)?.value();
    if item_count > 1000 {
        return Err(SerializationError::TooLong {
            len: item_count,
            max: 1000,
        });
    }
    let mut witness = Vec::with_capacity(std::cmp::min(item_count as usize, 64));
    for _ in 0..item_count {
        witness.push(read_limited_bytes(&mut reader, MAX_WITNESS_ITEM_BYTES)?);
    }
    Ok(witness)
}

/// Deserializes a transaction, calculating and caching its id.
impl BitcoinDeserialize for Transaction {
    fn bitcoin_deserialize<R: Read>(src: R) -> Result<Self, SerializationError> {
        // Bound the read to protect against a hostile length field upstream.
        let mut src = src.take(MAX_TX_BYTES);

        let version = i32::bitcoin_deserialize(&mut src)?;

        // The byte after the version is either the input count or the segwit
        // marker; only the marker can be zero.
        let count_or_marker = CompactInt::bitcoin_deserialize(&mut src)?.value();
        let (inputs, segwit) = if count_or_marker == 0 {
            let flag = u8::bitcoin_deserialize(&mut src)?;
            if flag != 0x01 {
                return Err(SerializationError::Parse("invalid segwit flag"));
            }
            let input_count = CompactInt::bitcoin_deserialize(&mut src)?.value();
            (read_inputs(&mut src, input_count)?, true)
        } else {
            (read_inputs(&mut src, count_or_marker)?, false)
        };

        let outputs = <Vec<transparent::Output>>::bitcoin_deserialize(&mut src)?;

        let witnesses = if segwit {
            let mut witnesses = Vec::with_capacity(inputs.len());
            for _ in 0..inputs.len() {
                witnesses.push(read_witness(&mut src)?);
            }
            witnesses
        } else {
            Vec::new()
        };

        let lock_time = LockTime::bitcoin_deserialize(&mut src)?;

        let mut tx = Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            witnesses,
            hash: Cached::new(),
        };
        let own_hash = Hash::from(&tx);
        tx.hash = Cached::from(own_hash);
        Ok(tx)
    }
}

/// Whether a transaction is small enough to relay.
pub fn is_standard_size(transaction: &Transaction) -> bool {
    transaction.len() <= MAX_STANDARD_TX_SIZE
}
