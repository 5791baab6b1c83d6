use kestrel_chain::amount::Amount;
use thiserror::Error;

/// Wallet operation failures.
#[derive(Error, Debug)]
pub enum WalletError {
    /// The spendable balance cannot fund the request.
    #[error("insufficient funds: short {shortfall} (missing_min_fee: {missing_min_fee})")]
    InsufficientFunds {
        /// How much more value the request needs.
        shortfall: Amount,
        /// Whether the shortfall only arises from the mandatory minimum
        /// fee, as opposed to the payment itself.
        missing_min_fee: bool,
    },
    /// A signing operation needs decrypted keys.
    #[error(transparent)]
    Key(#[from] kestrel_keys::KeyError),
    /// The assembled transaction would exceed the relay size limit.
    #[error("transaction exceeds the maximum standard size")]
    ExceedsMaxSize,
    /// The transaction isn't relevant to this wallet.
    #[error("transaction is not relevant to this wallet")]
    NotRelevant,
    /// A constructed amount left the valid money range.
    #[error("amount arithmetic failed: {0}")]
    Amount(#[from] kestrel_chain::amount::Error),
    /// Script construction or verification failed while signing.
    #[error("script error while signing: {0}")]
    Script(#[from] kestrel_script::ScriptError),
    /// Persistence failure.
    #[error("wallet file error: {0}")]
    Io(#[from] std::io::Error),
    /// The wallet file is malformed.
    #[error("wallet file is corrupt: {0}")]
    Corrupt(&'static str),
    /// Decoding failure inside the wallet file.
    #[error("wallet file decode error: {0}")]
    Decode(#[from] kestrel_chain::SerializationError),
    /// A second save failure flipped the wallet read-only.
    #[error("wallet is read-only after repeated save failures")]
    ReadOnly,
}
