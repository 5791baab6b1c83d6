//! BIP-32 hierarchical deterministic key derivation.

use hmac::{Hmac, Mac, NewMac};
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha2::Sha512;

use kestrel_chain::transparent::hash160;

use crate::{ECKey, KeyError};

type HmacSha512 = Hmac<Sha512>;

lazy_static::lazy_static! {
    static ref SECP: Secp256k1<secp256k1::All> = Secp256k1::new();
}

/// A child index, with the hardened bit in place.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildNumber(pub u32);

impl ChildNumber {
    const HARDENED_BIT: u32 = 1 << 31;

    /// A normal (public-derivable) child index.
    pub fn normal(index: u32) -> ChildNumber {
        assert!(index < Self::HARDENED_BIT, "index too large");
        ChildNumber(index)
    }

    /// A hardened child index.
    pub fn hardened(index: u32) -> ChildNumber {
        assert!(index < Self::HARDENED_BIT, "index too large");
        ChildNumber(index | Self::HARDENED_BIT)
    }

    /// Whether the hardened bit is set.
    pub fn is_hardened(&self) -> bool {
        self.0 & Self::HARDENED_BIT != 0
    }

    /// The index without the hardened bit.
    pub fn index(&self) -> u32 {
        self.0 & !Self::HARDENED_BIT
    }
}

impl std::fmt::Debug for ChildNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_hardened() {
            write!(f, "{}'", self.index())
        } else {
            write!(f, "{}", self.index())
        }
    }
}

/// A key in a BIP-32 hierarchy: an [`ECKey`] plus the chain code and path
/// metadata needed to derive children.
#[derive(Clone, Debug)]
pub struct DeterministicKey {
    key: ECKey,
    chain_code: [u8; 32],
    depth: u8,
    child_number: ChildNumber,
    parent_fingerprint: [u8; 4],
}

impl DeterministicKey {
    /// Derive the master key from a 64-byte BIP-39 seed.
    pub fn master(seed: &[u8], creation_time: u32) -> Result<DeterministicKey, KeyError> {
        let mut mac = HmacSha512::new_from_slice(b"Bitcoin seed")
            .expect("hmac accepts any key length");
        mac.update(seed);
        let output = mac.finalize().into_bytes();

        let key = ECKey::from_secret_bytes(&output[..32], true, creation_time)
            .map_err(|_| KeyError::DerivationOutOfRange)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&output[32..]);

        Ok(DeterministicKey {
            key,
            chain_code,
            depth: 0,
            child_number: ChildNumber(0),
            parent_fingerprint: [0u8; 4],
        })
    }

    /// The underlying signing key.
    pub fn key(&self) -> &ECKey {
        &self.key
    }

    /// The chain code.
    pub fn chain_code(&self) -> &[u8; 32] {
        &self.chain_code
    }

    /// The number of derivations between this key and the master.
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// This key's index under its parent.
    pub fn child_number(&self) -> ChildNumber {
        self.child_number
    }

    /// The first four bytes of the parent's key hash.
    pub fn parent_fingerprint(&self) -> &[u8; 4] {
        &self.parent_fingerprint
    }

    fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160(&self.key.serialize_public());
        let mut fingerprint = [0u8; 4];
        fingerprint.copy_from_slice(&hash[..4]);
        fingerprint
    }

    /// Derive one child.
    ///
    /// Hardened children need this key's private half; normal children can
    /// be derived from the public half alone, which is what lets a locked
    /// wallet keep generating addresses.
    pub fn derive_child(&self, child: ChildNumber) -> Result<DeterministicKey, KeyError> {
        let mut mac = HmacSha512::new_from_slice(&self.chain_code)
            .expect("hmac accepts any key length");

        if child.is_hardened() {
            if !self.key.has_secret() {
                return Err(if self.key.is_encrypted() {
                    KeyError::KeyIsEncrypted
                } else {
                    KeyError::HardenedDerivationFromPublic
                });
            }
            mac.update(&[0u8]);
            mac.update(&self.key.secret_bytes()?);
        } else {
            mac.update(&self.key.public_key().serialize());
        }
        mac.update(&child.0.to_be_bytes());

        let output = mac.finalize().into_bytes();
        let (tweak, chain_code_bytes) = output.split_at(32);

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(chain_code_bytes);

        let key = if self.key.has_secret() {
            let mut secret = SecretKey::from_slice(&self.key.secret_bytes()?)
                .expect("stored secret is valid");
            secret
                .add_assign(tweak)
                .map_err(|_| KeyError::DerivationOutOfRange)?;
            ECKey::from_secret_bytes(&secret[..], true, self.key.creation_time())
                .map_err(|_| KeyError::DerivationOutOfRange)?
        } else {
            let mut public = *self.key.public_key();
            public
                .add_exp_assign(&SECP, tweak)
                .map_err(|_| KeyError::DerivationOutOfRange)?;
            ECKey::from_public_bytes(&public.serialize(), self.key.creation_time())
                .map_err(|_| KeyError::DerivationOutOfRange)?
        };

        Ok(DeterministicKey {
            key,
            chain_code,
            depth: self.depth.saturating_add(1),
            child_number: child,
            parent_fingerprint: self.fingerprint(),
        })
    }

    /// Derive along a path of children.
    pub fn derive_path(&self, path: &[ChildNumber]) -> Result<DeterministicKey, KeyError> {
        let mut key = self.clone();
        for child in path {
            key = key.derive_child(*child)?;
        }
        Ok(key)
    }

    /// The public-only version of this key, for watch wallets and locked
    /// address generation.
    pub fn public_only(&self) -> DeterministicKey {
        let key = ECKey::from_public_bytes(
            &self.key.public_key().serialize(),
            self.key.creation_time(),
        )
        .expect("serialized public key reparses");
        DeterministicKey {
            key,
            chain_code: self.chain_code,
            depth: self.depth,
            child_number: self.child_number,
            parent_fingerprint: self.parent_fingerprint,
        }
    }

    /// A deterministic key rebuilt from stored parts (persistence path).
    pub fn from_parts(
        key: ECKey,
        chain_code: [u8; 32],
        depth: u8,
        child_number: ChildNumber,
        parent_fingerprint: [u8; 4],
    ) -> DeterministicKey {
        DeterministicKey {
            key,
            chain_code,
            depth,
            child_number,
            parent_fingerprint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_derivation_is_deterministic() {
        kestrel_test::init();

        let seed = [7u8; 64];
        let a = DeterministicKey::master(&seed, 0).unwrap();
        let b = DeterministicKey::master(&seed, 0).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.chain_code(), b.chain_code());
    }

    #[test]
    fn public_derivation_matches_private() {
        kestrel_test::init();

        let master = DeterministicKey::master(&[3u8; 64], 0).unwrap();
        let child = ChildNumber::normal(5);

        let from_private = master.derive_child(child).unwrap();
        let from_public = master.public_only().derive_child(child).unwrap();

        assert_eq!(
            from_private.key().public_key(),
            from_public.key().public_key()
        );
        assert_eq!(from_private.chain_code(), from_public.chain_code());
        assert_eq!(from_private.depth(), 1);
        assert_eq!(from_public.parent_fingerprint(), from_private.parent_fingerprint());
    }

    #[test]
    fn hardened_derivation_requires_secret() {
        kestrel_test::init();

        let master = DeterministicKey::master(&[4u8; 64], 0).unwrap();
        let hardened = ChildNumber::hardened(0);

        assert!(master.derive_child(hardened).is_ok());
        assert!(matches!(
            master.public_only().derive_child(hardened),
            Err(KeyError::HardenedDerivationFromPublic)
        ));
    }

    #[test]
    fn hardened_and_normal_children_differ() {
        kestrel_test::init();

        let master = DeterministicKey::master(&[5u8; 64], 0).unwrap();
        let normal = master.derive_child(ChildNumber::normal(1)).unwrap();
        let hardened = master.derive_child(ChildNumber::hardened(1)).unwrap();
        assert_ne!(normal.key().public_key(), hardened.key().public_key());
    }
}
