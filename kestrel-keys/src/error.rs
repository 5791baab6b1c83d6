use thiserror::Error;

/// Key management failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// An operation needing the private key was attempted on an encrypted
    /// key without supplying the passphrase.
    #[error("key is encrypted; decrypt it first")]
    KeyIsEncrypted,
    /// Decryption produced data that fails validation: wrong passphrase.
    #[error("wrong passphrase")]
    WrongPassword,
    /// An operation needing the private key was attempted on a watch-only
    /// key.
    #[error("key has no private part")]
    MissingPrivateKey,
    /// Key material failed secp256k1 validation.
    #[error("invalid key material")]
    InvalidKey,
    /// A BIP-32 derivation produced an out-of-range scalar.
    ///
    /// Happens with probability ~2^-127; callers skip to the next index.
    #[error("derived key is out of range, try the next index")]
    DerivationOutOfRange,
    /// Hardened derivation requires the parent private key.
    #[error("cannot derive a hardened child from a public-only key")]
    HardenedDerivationFromPublic,
    /// Mnemonic or entropy input failed validation.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(&'static str),
    /// Scrypt parameters were rejected.
    #[error("invalid scrypt parameters")]
    InvalidScryptParameters,
}
