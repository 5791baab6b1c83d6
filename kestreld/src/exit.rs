//! Process exit codes.

/// The fixed exit code contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Everything worked.
    Success = 0,
    /// Bad command line or environment.
    InvalidArgs = 2,
    /// The wallet cannot fund the request.
    InsufficientFunds = 3,
    /// Wrong wallet passphrase.
    BadPassword = 4,
    /// The header chain hasn't caught up far enough to proceed.
    ChainNotSynced = 5,
    /// Anything else.
    Unexpected = 10,
}

impl ExitCode {
    /// Map a wallet error onto the exit contract.
    pub fn from_wallet_error(error: &kestrel_wallet::WalletError) -> ExitCode {
        use kestrel_keys::KeyError;
        use kestrel_wallet::WalletError;

        match error {
            WalletError::InsufficientFunds { .. } => ExitCode::InsufficientFunds,
            WalletError::Key(KeyError::WrongPassword)
            | WalletError::Key(KeyError::KeyIsEncrypted) => ExitCode::BadPassword,
            _ => ExitCode::Unexpected,
        }
    }
}
