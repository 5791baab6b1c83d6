//! Passphrase-based key encryption: scrypt key derivation plus
//! AES-256-CBC with PKCS#7 padding, IV stored beside the ciphertext.

use aes::Aes256;
use block_modes::{block_padding::Pkcs7, BlockMode, Cbc};
use rand::RngCore;

use crate::KeyError;

type Aes256Cbc = Cbc<Aes256, Pkcs7>;

/// Scrypt difficulty parameters, persisted with the wallet so old wallets
/// keep decrypting after defaults change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScryptParameters {
    /// CPU/memory cost, a power of two.
    pub n: u64,
    /// Block size.
    pub r: u32,
    /// Parallelism.
    pub p: u32,
    /// Per-wallet salt.
    pub salt: Vec<u8>,
}

impl ScryptParameters {
    /// Defaults tuned for interactive unlock on commodity hardware.
    pub fn random() -> ScryptParameters {
        let mut salt = vec![0u8; 8];
        rand::thread_rng().fill_bytes(&mut salt);
        ScryptParameters {
            n: 16384,
            r: 8,
            p: 1,
            salt,
        }
    }

    fn log_n(&self) -> Result<u8, KeyError> {
        if !self.n.is_power_of_two() || self.n < 2 {
            return Err(KeyError::InvalidScryptParameters);
        }
        Ok(63 - self.n.leading_zeros() as u8)
    }
}

/// A ciphertext and the IV it was encrypted under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// The AES-CBC initialisation vector.
    pub iv: [u8; 16],
    /// The padded ciphertext.
    pub ciphertext: Vec<u8>,
}

/// Derives an AES key from a passphrase and encrypts/decrypts under it.
#[derive(Clone)]
pub struct KeyCrypter {
    parameters: ScryptParameters,
}

impl KeyCrypter {
    /// A crypter using the given persisted parameters.
    pub fn new(parameters: ScryptParameters) -> KeyCrypter {
        KeyCrypter { parameters }
    }

    /// The parameters this crypter derives with.
    pub fn parameters(&self) -> &ScryptParameters {
        &self.parameters
    }

    /// Stretch `passphrase` into a 32-byte AES key.
    pub fn derive_key(&self, passphrase: &str) -> Result<[u8; 32], KeyError> {
        let params = scrypt::Params::new(
            self.parameters.log_n()?,
            self.parameters.r,
            self.parameters.p,
        )
        .map_err(|_| KeyError::InvalidScryptParameters)?;

        let mut key = [0u8; 32];
        scrypt::scrypt(
            passphrase.as_bytes(),
            &self.parameters.salt,
            &params,
            &mut key,
        )
        .map_err(|_| KeyError::InvalidScryptParameters)?;
        Ok(key)
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn encrypt(&self, key: &[u8; 32], plaintext: &[u8]) -> EncryptedData {
        let mut iv = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256Cbc::new_from_slices(key, &iv)
            .expect("key and IV lengths are fixed and valid");
        EncryptedData {
            iv,
            ciphertext: cipher.encrypt_vec(plaintext),
        }
    }

    /// Decrypt, reporting `WrongPassword` when the padding check fails.
    pub fn decrypt(&self, key: &[u8; 32], data: &EncryptedData) -> Result<Vec<u8>, KeyError> {
        let cipher = Aes256Cbc::new_from_slices(key, &data.iv)
            .expect("key and IV lengths are fixed and valid");
        cipher
            .decrypt_vec(&data.ciphertext)
            .map_err(|_| KeyError::WrongPassword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        kestrel_test::init();

        let crypter = KeyCrypter::new(ScryptParameters {
            // Fast parameters so the test suite stays quick.
            n: 4,
            r: 1,
            p: 1,
            salt: vec![1, 2, 3, 4],
        });
        let key = crypter.derive_key("correct horse").unwrap();
        let encrypted = crypter.encrypt(&key, b"attack at dawn");

        assert_eq!(
            crypter.decrypt(&key, &encrypted).unwrap(),
            b"attack at dawn".to_vec()
        );
    }

    #[test]
    fn wrong_passphrase_detected() {
        kestrel_test::init();

        let crypter = KeyCrypter::new(ScryptParameters {
            n: 4,
            r: 1,
            p: 1,
            salt: vec![1, 2, 3, 4],
        });
        let key = crypter.derive_key("right").unwrap();
        let wrong = crypter.derive_key("wrong").unwrap();
        let encrypted = crypter.encrypt(&key, b"plaintext payload longer than a block");

        assert_eq!(
            crypter.decrypt(&wrong, &encrypted),
            Err(KeyError::WrongPassword)
        );
    }

    #[test]
    fn invalid_parameters_rejected() {
        let crypter = KeyCrypter::new(ScryptParameters {
            n: 3, // not a power of two
            r: 1,
            p: 1,
            salt: vec![],
        });
        assert_eq!(
            crypter.derive_key("x"),
            Err(KeyError::InvalidScryptParameters)
        );
    }
}
