//! Wire serialization for inputs and outpoints.
//!
//! Inputs need hand-written impls because the coinbase variant is
//! distinguished on the wire only by the null outpoint.

use std::io;

use crate::serialization::{
    read_limited_bytes, BitcoinDeserialize, BitcoinSerialize, SerializationError,
};
use crate::{amount, transaction};

use super::{script::MAX_SCRIPT_BYTES, Amount, CoinbaseData, Input, NonNegative, OutPoint, Output, Script};

/// The consensus limit on coinbase data length.
const MAX_COINBASE_DATA_BYTES: u64 = 100;

impl BitcoinDeserialize for OutPoint {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            hash: transaction::Hash::bitcoin_deserialize(&mut reader)?,
            index: u32::bitcoin_deserialize(&mut reader)?,
        })
    }
}

impl BitcoinSerialize for Input {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            } => {
                outpoint.bitcoin_serialize(&mut target)?;
                unlock_script.bitcoin_serialize(&mut target)?;
                sequence.bitcoin_serialize(&mut target)
            }
            Input::Coinbase { data, sequence } => {
                OutPoint::null().bitcoin_serialize(&mut target)?;
                data.0.bitcoin_serialize(&mut target)?;
                sequence.bitcoin_serialize(&mut target)
            }
        }
    }
}

impl BitcoinDeserialize for Input {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::bitcoin_deserialize(&mut reader)?;
        if outpoint.is_null() {
            let data = read_limited_bytes(&mut reader, MAX_COINBASE_DATA_BYTES)?;
            Ok(Input::Coinbase {
                data: CoinbaseData(data),
                sequence: u32::bitcoin_deserialize(&mut reader)?,
            })
        } else {
            Ok(Input::PrevOut {
                outpoint,
                unlock_script: Script(read_limited_bytes(&mut reader, MAX_SCRIPT_BYTES)?),
                sequence: u32::bitcoin_deserialize(&mut reader)?,
            })
        }
    }
}

impl BitcoinDeserialize for Output {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Output {
            value: Amount::<NonNegative>::bitcoin_deserialize(&mut reader)?,
            lock_script: Script::bitcoin_deserialize(&mut reader)?,
        })
    }
}

/// Sum the values of an output list, erroring on overflow.
pub fn output_total(outputs: &[Output]) -> Result<Amount<NonNegative>, amount::Error> {
    amount::sum(outputs.iter().map(|output| output.value))
}
