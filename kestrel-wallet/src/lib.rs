//! The Kestrel wallet: keys, transaction pools, coin selection, and the
//! reorg/double-spend state machine that keeps balances honest while the
//! chain shifts underneath them.

pub mod coin_selection;
mod confidence;
mod error;
mod events;
pub mod fee;
mod keychain;
pub mod store;
mod wallet;

pub use coin_selection::{Candidate, FeeCategory, SendRequest, Solution};
pub use confidence::{ConfidenceKind, Source, TxConfidence};
pub use error::WalletError;
pub use events::{Listener, WalletEvent};
pub use keychain::{IssuedKey, KeyChain, KeyPurpose};
pub use store::WalletStore;
pub use wallet::{BalanceType, BlockMode, Config, Pool, TxPurpose, Wallet};
