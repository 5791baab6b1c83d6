//! The wallet's root secret: entropy, its mnemonic form, and the derived
//! BIP-32 seed.

use rand::RngCore;

use crate::encryption::{EncryptedData, KeyCrypter};
use crate::{mnemonic, KeyError};

/// A deterministic wallet seed.
///
/// When unlocked, the mnemonic sentence and the 64-byte derived seed are
/// both available. When encrypted, only the ciphertext of the mnemonic
/// remains; the chain code and public keys derived earlier stay usable, so
/// a locked wallet can still hand out fresh addresses.
#[derive(Clone)]
pub struct DeterministicSeed {
    mnemonic: Option<String>,
    seed: Option<Vec<u8>>,
    encrypted_mnemonic: Option<EncryptedData>,
    creation_time: u32,
}

impl std::fmt::Debug for DeterministicSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicSeed")
            .field("creation_time", &self.creation_time)
            .field("encrypted", &self.is_encrypted())
            .finish()
    }
}

impl DeterministicSeed {
    /// Generate a fresh seed from `entropy_bits` of system randomness.
    pub fn generate(
        entropy_bits: usize,
        passphrase: &str,
        creation_time: u32,
    ) -> Result<DeterministicSeed, KeyError> {
        if entropy_bits % 8 != 0 {
            return Err(KeyError::InvalidMnemonic("entropy bits must be whole bytes"));
        }
        let mut entropy = vec![0u8; entropy_bits / 8];
        rand::thread_rng().fill_bytes(&mut entropy);
        DeterministicSeed::from_entropy(&entropy, passphrase, creation_time)
    }

    /// Build from explicit entropy.
    pub fn from_entropy(
        entropy: &[u8],
        passphrase: &str,
        creation_time: u32,
    ) -> Result<DeterministicSeed, KeyError> {
        let words = mnemonic::entropy_to_mnemonic(entropy)?;
        let seed = mnemonic::to_seed(&words, passphrase);
        Ok(DeterministicSeed {
            mnemonic: Some(words.join(" ")),
            seed: Some(seed.to_vec()),
            encrypted_mnemonic: None,
            creation_time,
        })
    }

    /// Rebuild from a mnemonic sentence, verifying its checksum.
    pub fn from_mnemonic(
        sentence: &str,
        passphrase: &str,
        creation_time: u32,
    ) -> Result<DeterministicSeed, KeyError> {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        mnemonic::mnemonic_to_entropy(&words)?;
        let seed = mnemonic::to_seed(&words, passphrase);
        Ok(DeterministicSeed {
            mnemonic: Some(words.join(" ")),
            seed: Some(seed.to_vec()),
            encrypted_mnemonic: None,
            creation_time,
        })
    }

    /// Rebuild an encrypted seed loaded from disk.
    pub fn from_encrypted(encrypted_mnemonic: EncryptedData, creation_time: u32) -> DeterministicSeed {
        DeterministicSeed {
            mnemonic: None,
            seed: None,
            encrypted_mnemonic: Some(encrypted_mnemonic),
            creation_time,
        }
    }

    /// The 64-byte seed BIP-32 derives from.
    pub fn seed_bytes(&self) -> Result<&[u8], KeyError> {
        self.seed.as_deref().ok_or(KeyError::KeyIsEncrypted)
    }

    /// The mnemonic sentence, if unlocked.
    pub fn mnemonic(&self) -> Result<&str, KeyError> {
        self.mnemonic.as_deref().ok_or(KeyError::KeyIsEncrypted)
    }

    /// The ciphertext, if encrypted.
    pub fn encrypted_mnemonic(&self) -> Option<&EncryptedData> {
        self.encrypted_mnemonic.as_ref()
    }

    /// The Unix time this seed was created.
    pub fn creation_time(&self) -> u32 {
        self.creation_time
    }

    /// Whether the secret material is currently ciphertext-only.
    pub fn is_encrypted(&self) -> bool {
        self.seed.is_none() && self.encrypted_mnemonic.is_some()
    }

    /// Encrypt the mnemonic, dropping cleartext secrets.
    pub fn encrypt(&self, crypter: &KeyCrypter, aes_key: &[u8; 32]) -> Result<DeterministicSeed, KeyError> {
        let sentence = self.mnemonic()?;
        Ok(DeterministicSeed {
            mnemonic: None,
            seed: None,
            encrypted_mnemonic: Some(crypter.encrypt(aes_key, sentence.as_bytes())),
            creation_time: self.creation_time,
        })
    }

    /// Decrypt back to a usable seed.
    ///
    /// The BIP-39 passphrase is distinct from the wallet encryption
    /// passphrase; both are needed here.
    pub fn decrypt(
        &self,
        crypter: &KeyCrypter,
        aes_key: &[u8; 32],
        bip39_passphrase: &str,
    ) -> Result<DeterministicSeed, KeyError> {
        let encrypted = self
            .encrypted_mnemonic
            .as_ref()
            .ok_or(KeyError::KeyIsEncrypted)?;
        let sentence_bytes = crypter.decrypt(aes_key, encrypted)?;
        let sentence =
            String::from_utf8(sentence_bytes).map_err(|_| KeyError::WrongPassword)?;
        // A wrong AES key that survives the padding check produces garbage;
        // the mnemonic checksum rejects it.
        DeterministicSeed::from_mnemonic(&sentence, bip39_passphrase, self.creation_time)
            .map_err(|_| KeyError::WrongPassword)
    }
}
