//! The header chain store: persistent, fork-aware storage for verified
//! block headers.
//!
//! The store tracks every header that attaches to the tree rooted at the
//! genesis block, keeps one chain marked as *best* (the one with the most
//! cumulative work), and reports best-chain changes as
//! [`ChainEvent`]s: blocks disconnected newest-first, then blocks
//! connected oldest-first, which is exactly the order the wallet needs to
//! replay them in.

#[macro_use]
extern crate serde;

mod chain;
mod check;
mod error;
mod format;
mod locator;
mod store;

pub use chain::{ChainEvent, ChainStore};
pub use error::ChainError;
pub use locator::block_locator_heights;

use std::path::PathBuf;

/// Chain store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The directory holding the header database.
    pub cache_dir: PathBuf,
    /// How many recent best-chain blocks may be disconnected by a
    /// reorganization. Anything deeper is treated as final and refused.
    pub undo_depth: u32,
    /// Keep the database in memory only; for tests.
    pub ephemeral: bool,
}

impl Config {
    /// An in-memory store for tests.
    pub fn ephemeral() -> Config {
        Config {
            ephemeral: true,
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("kestrel"),
            undo_depth: 288,
            ephemeral: false,
        }
    }
}
