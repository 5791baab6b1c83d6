//! Keys for the Kestrel wallet: ECDSA signing keys, scrypt/AES key
//! encryption, BIP-32 hierarchical derivation, and BIP-39 mnemonics.
//!
//! Everything here is deterministic given its inputs; entropy enters only
//! through explicit `rand` calls at key/seed creation.

#[macro_use]
extern crate serde;

mod bip32;
mod eckey;
mod encryption;
mod error;
pub mod mnemonic;
mod seed;

pub use bip32::{ChildNumber, DeterministicKey};
pub use eckey::ECKey;
pub use encryption::{EncryptedData, KeyCrypter, ScryptParameters};
pub use error::KeyError;
pub use seed::DeterministicSeed;
