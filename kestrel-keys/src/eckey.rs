//! A single ECDSA key over secp256k1.

use kestrel_chain::transaction::SigHash;
use kestrel_chain::transparent::hash160;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey, Signature};

use crate::encryption::{EncryptedData, KeyCrypter};
use crate::KeyError;

lazy_static::lazy_static! {
    static ref SECP: Secp256k1<All> = Secp256k1::new();
}

/// An elliptic-curve key.
///
/// Three shapes, by which fields are present:
/// - full key: `secret` present;
/// - encrypted key: `secret` absent, `encrypted_secret` present;
/// - watch-only key: both absent.
///
/// The public half and creation time are always present. Signatures are
/// deterministic (RFC 6979) and low-S canonical DER, as produced by
/// libsecp256k1.
#[derive(Clone)]
pub struct ECKey {
    secret: Option<SecretKey>,
    public: PublicKey,
    compressed: bool,
    creation_time: u32,
    encrypted_secret: Option<EncryptedData>,
}

impl std::fmt::Debug for ECKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never log private material.
        f.debug_struct("ECKey")
            .field("public", &hex::encode(self.serialize_public()))
            .field("compressed", &self.compressed)
            .field("creation_time", &self.creation_time)
            .field("encrypted", &self.encrypted_secret.is_some())
            .finish()
    }
}

impl PartialEq for ECKey {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public && self.compressed == other.compressed
    }
}

impl Eq for ECKey {}

impl ECKey {
    /// Generate a fresh random key.
    pub fn new_random(creation_time: u32) -> ECKey {
        let mut rng = secp256k1::rand::thread_rng();
        let secret = SecretKey::new(&mut rng);
        let public = PublicKey::from_secret_key(&SECP, &secret);
        ECKey {
            secret: Some(secret),
            public,
            compressed: true,
            creation_time,
            encrypted_secret: None,
        }
    }

    /// Build from 32 bytes of private key material.
    pub fn from_secret_bytes(bytes: &[u8], compressed: bool, creation_time: u32) -> Result<ECKey, KeyError> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| KeyError::InvalidKey)?;
        let public = PublicKey::from_secret_key(&SECP, &secret);
        Ok(ECKey {
            secret: Some(secret),
            public,
            compressed,
            creation_time,
            encrypted_secret: None,
        })
    }

    /// Build a watch-only key from a serialized public key.
    pub fn from_public_bytes(bytes: &[u8], creation_time: u32) -> Result<ECKey, KeyError> {
        let public = PublicKey::from_slice(bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(ECKey {
            secret: None,
            public,
            compressed: bytes.len() == 33,
            creation_time,
            encrypted_secret: None,
        })
    }

    /// Rebuild an encrypted key loaded from disk.
    pub fn from_encrypted(
        encrypted_secret: EncryptedData,
        public_bytes: &[u8],
        creation_time: u32,
    ) -> Result<ECKey, KeyError> {
        let public = PublicKey::from_slice(public_bytes).map_err(|_| KeyError::InvalidKey)?;
        Ok(ECKey {
            secret: None,
            public,
            compressed: public_bytes.len() == 33,
            creation_time,
            encrypted_secret: Some(encrypted_secret),
        })
    }

    /// The public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The serialized public key, respecting this key's compression.
    pub fn serialize_public(&self) -> Vec<u8> {
        if self.compressed {
            self.public.serialize().to_vec()
        } else {
            self.public.serialize_uncompressed().to_vec()
        }
    }

    /// Hash160 of the serialized public key, as P2PKH scripts carry.
    pub fn pub_key_hash(&self) -> [u8; 20] {
        hash160(&self.serialize_public())
    }

    /// Whether this key serializes its public half compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// The Unix time this key was created, for chain-scan lower bounds and
    /// key rotation.
    pub fn creation_time(&self) -> u32 {
        self.creation_time
    }

    /// Whether the private half is present in cleartext.
    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    /// Whether the private half is present but encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted_secret.is_some() && self.secret.is_none()
    }

    /// The encrypted private key payload, if any.
    pub fn encrypted_secret(&self) -> Option<&EncryptedData> {
        self.encrypted_secret.as_ref()
    }

    /// The raw secret bytes. Used by persistence and BIP-32 derivation.
    pub fn secret_bytes(&self) -> Result<[u8; 32], KeyError> {
        match &self.secret {
            Some(secret) => {
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(&secret[..]);
                Ok(bytes)
            }
            None if self.encrypted_secret.is_some() => Err(KeyError::KeyIsEncrypted),
            None => Err(KeyError::MissingPrivateKey),
        }
    }

    /// Sign a 32-byte transaction digest, returning canonical DER.
    pub fn sign(&self, sighash: &SigHash) -> Result<Vec<u8>, KeyError> {
        let secret = match &self.secret {
            Some(secret) => secret,
            None if self.encrypted_secret.is_some() => return Err(KeyError::KeyIsEncrypted),
            None => return Err(KeyError::MissingPrivateKey),
        };
        let message = Message::from_slice(sighash.as_bytes())
            .expect("a 32 byte sighash is a valid message");
        Ok(SECP.sign(&message, secret).serialize_der().to_vec())
    }

    /// Verify a DER signature over a digest against this key.
    pub fn verify(&self, sighash: &SigHash, signature_der: &[u8]) -> bool {
        let message = Message::from_slice(sighash.as_bytes())
            .expect("a 32 byte sighash is a valid message");
        Signature::from_der(signature_der)
            .map(|signature| SECP.verify(&message, &signature, &self.public).is_ok())
            .unwrap_or(false)
    }

    /// Encrypt the private half, dropping the cleartext copy.
    pub fn encrypt(&self, crypter: &KeyCrypter, aes_key: &[u8; 32]) -> Result<ECKey, KeyError> {
        let secret_bytes = self.secret_bytes()?;
        Ok(ECKey {
            secret: None,
            public: self.public,
            compressed: self.compressed,
            creation_time: self.creation_time,
            encrypted_secret: Some(crypter.encrypt(aes_key, &secret_bytes)),
        })
    }

    /// Decrypt the private half.
    ///
    /// Padding survives a wrong key about one time in 256, so the decrypted
    /// scalar is checked against the stored public key; a mismatch is the
    /// same `WrongPassword` error.
    pub fn decrypt(&self, crypter: &KeyCrypter, aes_key: &[u8; 32]) -> Result<ECKey, KeyError> {
        let encrypted = self
            .encrypted_secret
            .as_ref()
            .ok_or(KeyError::MissingPrivateKey)?;
        let secret_bytes = crypter.decrypt(aes_key, encrypted)?;
        let secret = SecretKey::from_slice(&secret_bytes).map_err(|_| KeyError::WrongPassword)?;
        if PublicKey::from_secret_key(&SECP, &secret) != self.public {
            return Err(KeyError::WrongPassword);
        }
        Ok(ECKey {
            secret: Some(secret),
            public: self.public,
            compressed: self.compressed,
            creation_time: self.creation_time,
            encrypted_secret: self.encrypted_secret.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::ScryptParameters;

    fn digest(byte: u8) -> SigHash {
        SigHash([byte; 32])
    }

    #[test]
    fn sign_and_verify() {
        kestrel_test::init();

        let key = ECKey::new_random(0);
        let signature = key.sign(&digest(7)).unwrap();
        assert!(key.verify(&digest(7), &signature));
        assert!(!key.verify(&digest(8), &signature));
    }

    #[test]
    fn signing_is_deterministic() {
        kestrel_test::init();

        let key = ECKey::from_secret_bytes(&[0x11; 32], true, 0).unwrap();
        assert_eq!(key.sign(&digest(1)).unwrap(), key.sign(&digest(1)).unwrap());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        kestrel_test::init();

        let crypter = KeyCrypter::new(ScryptParameters {
            n: 4,
            r: 1,
            p: 1,
            salt: vec![9, 9],
        });
        let aes_key = crypter.derive_key("hunter2").unwrap();
        let wrong_key = crypter.derive_key("hunter3").unwrap();

        let key = ECKey::new_random(42);
        let locked = key.encrypt(&crypter, &aes_key).unwrap();
        assert!(locked.is_encrypted());
        assert_eq!(locked.sign(&digest(1)), Err(KeyError::KeyIsEncrypted));

        let unlocked = locked.decrypt(&crypter, &aes_key).unwrap();
        assert_eq!(
            unlocked.secret_bytes().unwrap(),
            key.secret_bytes().unwrap()
        );
        assert_eq!(unlocked.creation_time(), 42);

        assert_eq!(
            locked.decrypt(&crypter, &wrong_key),
            Err(KeyError::WrongPassword)
        );
    }

    #[test]
    fn watch_only_cannot_sign() {
        kestrel_test::init();

        let key = ECKey::new_random(0);
        let watch = ECKey::from_public_bytes(&key.serialize_public(), 0).unwrap();
        assert!(!watch.has_secret());
        assert_eq!(watch.sign(&digest(1)), Err(KeyError::MissingPrivateKey));
        assert_eq!(watch.pub_key_hash(), key.pub_key_hash());
    }
}
