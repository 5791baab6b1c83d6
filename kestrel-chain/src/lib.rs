//! Consensus-critical data structures for the Kestrel SPV node.
//!
//! This crate holds everything whose byte layout is fixed by the Bitcoin
//! consensus or wire protocols: the serialization codec, hashes, amounts,
//! block headers and blocks, transactions, transparent outputs and scripts,
//! difficulty arithmetic, and per-network parameters. Nothing in here does
//! I/O or holds locks; higher layers (state, wallet, network) compose these
//! types.

#![allow(clippy::unit_arg)]

#[macro_use]
extern crate serde;

pub mod amount;
pub mod block;
pub mod cached;
pub mod compactint;
pub mod fmt;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod transparent;
pub mod work;

pub use serialization::{
    BitcoinDeserialize, BitcoinDeserializeInto, BitcoinSerialize, SerializationError,
};
