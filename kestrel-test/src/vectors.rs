//! Hard-coded byte vectors for deterministic tests.

use lazy_static::lazy_static;

lazy_static! {
    /// The mainnet genesis block header, all 80 bytes.
    ///
    /// Hashes to 000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f.
    pub static ref MAINNET_GENESIS_HEADER: Vec<u8> = hex::decode(
        "0100000000000000000000000000000000000000000000000000000000000000\
         000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa\
         4b1e5e4a29ab5f49ffff001d1dac2b7c"
    )
    .expect("hard-coded hex is valid");

    /// A minimal one-input one-output legacy transaction, for codec tests.
    ///
    /// Not a real chain transaction: the input spends a dummy outpoint with
    /// an `OP_TRUE` unlock script, and the output pays one satoshi to an
    /// `OP_TRUE` lock script.
    pub static ref DUMMY_TX1: Vec<u8> = hex::decode(
        "01000000\
         01\
         1111111111111111111111111111111111111111111111111111111111111111\
         01000000\
         0151\
         ffffffff\
         01\
         0100000000000000\
         0151\
         00000000"
    )
    .expect("hard-coded hex is valid");
}
