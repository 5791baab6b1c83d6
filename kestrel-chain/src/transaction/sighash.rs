//! The legacy signature hash: the message `OP_CHECKSIG` actually signs.
//!
//! The transaction is reserialized with input scripts blanked (except the
//! input being signed, which carries the script code), optionally with
//! outputs dropped or truncated per the hash type, then the four-byte hash
//! type is appended and the whole thing is SHA-256d'd.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::compactint::CompactInt;
use crate::serialization::{sha256d, BitcoinSerialize};
use crate::transparent::{self, Script};

use super::Transaction;

/// Signature hash type flags, carried in the final byte of a signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SighashType(pub u32);

impl SighashType {
    /// Sign all inputs and all outputs.
    pub const ALL: SighashType = SighashType(1);
    /// Sign all inputs, no outputs.
    pub const NONE: SighashType = SighashType(2);
    /// Sign all inputs and the output paired with the signed input.
    pub const SINGLE: SighashType = SighashType(3);
    /// Flag bit: commit to only the signed input.
    pub const ANYONE_CAN_PAY_FLAG: u32 = 0x80;

    /// The output-selection mode, with flag bits masked off.
    pub fn base(self) -> u32 {
        self.0 & 0x1f
    }

    /// Whether the signature commits to only its own input.
    pub fn anyone_can_pay(self) -> bool {
        self.0 & Self::ANYONE_CAN_PAY_FLAG != 0
    }
}

/// A computed signature hash.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SigHash(pub [u8; 32]);

impl SigHash {
    /// The bytes signed and verified by ECDSA.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Transaction {
    /// Compute the signature hash for `input_index` under `hash_type`, with
    /// `script_code` standing in for the spent output's locking script.
    ///
    /// `input_index` must be a valid index; callers (the script engine and
    /// the wallet's signer) check it against the input list first.
    pub fn sighash(&self, input_index: usize, script_code: &Script, hash_type: SighashType) -> SigHash {
        assert!(input_index < self.inputs.len(), "input index out of range");

        // A SIGHASH_SINGLE signature on an input with no matching output
        // signs the constant 1 instead of a transaction digest. Historical
        // bug, consensus forever.
        if hash_type.base() == SighashType::SINGLE.0 && input_index >= self.outputs.len() {
            let mut one = [0u8; 32];
            one[0] = 1;
            return SigHash(one);
        }

        let mut writer = sha256d::Writer::default();
        self.write_sighash_preimage(&mut writer, input_index, script_code, hash_type)
            .expect("sha256d::Writer is infallible");
        SigHash(writer.finish())
    }

    fn write_sighash_preimage<W: Write>(
        &self,
        mut target: W,
        input_index: usize,
        script_code: &Script,
        hash_type: SighashType,
    ) -> Result<(), io::Error> {
        let base = hash_type.base();
        let anyone_can_pay = hash_type.anyone_can_pay();

        self.version.bitcoin_serialize(&mut target)?;

        // Inputs.
        if anyone_can_pay {
            CompactInt::from(1).bitcoin_serialize(&mut target)?;
            write_input(&mut target, &self.inputs[input_index], Some(script_code), None)?;
        } else {
            CompactInt::from(self.inputs.len()).bitcoin_serialize(&mut target)?;
            for (index, input) in self.inputs.iter().enumerate() {
                let script = if index == input_index {
                    Some(script_code)
                } else {
                    None
                };
                // NONE and SINGLE zero the other inputs' sequence numbers so
                // miners can update them without breaking the signature.
                let sequence_override =
                    if index != input_index && base != SighashType::ALL.0 {
                        Some(0)
                    } else {
                        None
                    };
                write_input(&mut target, input, script, sequence_override)?;
            }
        }

        // Outputs.
        match base {
            base if base == SighashType::NONE.0 => {
                CompactInt::from(0).bitcoin_serialize(&mut target)?;
            }
            base if base == SighashType::SINGLE.0 => {
                CompactInt::from(input_index + 1).bitcoin_serialize(&mut target)?;
                // Earlier outputs are replaced by the "null" output:
                // value -1, empty script.
                for _ in 0..input_index {
                    target.write_i64::<LittleEndian>(-1)?;
                    CompactInt::from(0).bitcoin_serialize(&mut target)?;
                }
                self.outputs[input_index].bitcoin_serialize(&mut target)?;
            }
            _ => {
                self.outputs.bitcoin_serialize(&mut target)?;
            }
        }

        self.lock_time.bitcoin_serialize(&mut target)?;
        target.write_u32::<LittleEndian>(hash_type.0)
    }
}

fn write_input<W: Write>(
    mut target: W,
    input: &transparent::Input,
    script_code: Option<&Script>,
    sequence_override: Option<u32>,
) -> Result<(), io::Error> {
    match input {
        transparent::Input::PrevOut {
            outpoint,
            sequence,
            ..
        } => {
            outpoint.bitcoin_serialize(&mut target)?;
            match script_code {
                Some(script) => script.bitcoin_serialize(&mut target)?,
                None => CompactInt::from(0).bitcoin_serialize(&mut target)?,
            }
            sequence_override
                .unwrap_or(*sequence)
                .bitcoin_serialize(&mut target)
        }
        transparent::Input::Coinbase { sequence, .. } => {
            // Coinbase inputs are never signed, but serialize consistently.
            transparent::OutPoint::null().bitcoin_serialize(&mut target)?;
            match script_code {
                Some(script) => script.bitcoin_serialize(&mut target)?,
                None => CompactInt::from(0).bitcoin_serialize(&mut target)?,
            }
            sequence_override
                .unwrap_or(*sequence)
                .bitcoin_serialize(&mut target)
        }
    }
}
