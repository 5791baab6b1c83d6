//! The wallet's deterministic key chain.
//!
//! One BIP-32 tree per wallet: external keys at `m/0'/0/i` receive
//! payments, internal keys at `m/0'/1/i` receive change. Issued keys are
//! indexed by the script hash they appear as on-chain, which is the hot
//! lookup during transaction matching.

use std::collections::HashMap;

use kestrel_chain::parameters::Network;
use kestrel_chain::transparent::{Address, Script};
use kestrel_keys::{
    ChildNumber, DeterministicKey, DeterministicSeed, ECKey, KeyCrypter, KeyError,
    ScryptParameters,
};
use kestrel_script::template;

/// Which branch of the tree a key came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Hands out receive addresses.
    External,
    /// Hands out change addresses.
    Internal,
}

/// An issued key with its position in the tree.
#[derive(Clone, Debug)]
pub struct IssuedKey {
    /// The key itself.
    pub key: DeterministicKey,
    /// Branch.
    pub purpose: KeyPurpose,
    /// Index under the branch.
    pub index: u32,
}

/// The wallet's key tree plus issued-key bookkeeping.
pub struct KeyChain {
    network: Network,
    seed: DeterministicSeed,
    external: DeterministicKey,
    internal: DeterministicKey,
    issued: Vec<IssuedKey>,
    by_pub_key_hash: HashMap<[u8; 20], usize>,
    crypter: Option<KeyCrypter>,
    /// Keys created before this time are due for rotation sweeps.
    rotation_time: Option<u32>,
    /// Issued counts (external, internal) at the moment rotation was
    /// configured; keys issued afterwards are post-rotation.
    rotation_snapshot: Option<(u32, u32)>,
}

impl KeyChain {
    /// Build a chain from a seed.
    pub fn from_seed(seed: DeterministicSeed, network: Network) -> Result<KeyChain, KeyError> {
        let master = DeterministicKey::master(seed.seed_bytes()?, seed.creation_time())?;
        let account = master.derive_child(ChildNumber::hardened(0))?;
        let external = account.derive_child(ChildNumber::normal(0))?;
        let internal = account.derive_child(ChildNumber::normal(1))?;

        Ok(KeyChain {
            network,
            seed,
            external,
            internal,
            issued: Vec::new(),
            by_pub_key_hash: HashMap::new(),
            crypter: None,
            rotation_time: None,
            rotation_snapshot: None,
        })
    }

    /// Generate a brand-new chain from fresh entropy.
    pub fn generate(network: Network, creation_time: u32) -> Result<KeyChain, KeyError> {
        let seed = DeterministicSeed::generate(128, "", creation_time)?;
        KeyChain::from_seed(seed, network)
    }

    /// The network addresses are issued for.
    pub fn network(&self) -> Network {
        self.network
    }

    /// The wallet's seed.
    pub fn seed(&self) -> &DeterministicSeed {
        &self.seed
    }

    /// The active key crypter, when the wallet is encrypted.
    pub fn crypter(&self) -> Option<&KeyCrypter> {
        self.crypter.as_ref()
    }

    /// The configured rotation cutoff.
    pub fn rotation_time(&self) -> Option<u32> {
        self.rotation_time
    }

    /// Set the rotation cutoff: keys created before `time` are retired.
    ///
    /// Keys issued from this point on are considered post-rotation even
    /// though derivation stamps them with the seed's creation time, so
    /// sweep destinations never become sweep sources.
    pub fn set_rotation_time(&mut self, time: Option<u32>) {
        self.rotation_time = time;
        self.rotation_snapshot = time.map(|_| {
            (
                self.issued_count(KeyPurpose::External),
                self.issued_count(KeyPurpose::Internal),
            )
        });
    }

    fn branch(&self, purpose: KeyPurpose) -> &DeterministicKey {
        match purpose {
            KeyPurpose::External => &self.external,
            KeyPurpose::Internal => &self.internal,
        }
    }

    fn issued_count(&self, purpose: KeyPurpose) -> u32 {
        self.issued
            .iter()
            .filter(|issued| issued.purpose == purpose)
            .count() as u32
    }

    /// Issue the next key on `purpose`'s branch.
    pub fn issue_key(&mut self, purpose: KeyPurpose) -> Result<&IssuedKey, KeyError> {
        let mut index = self.issued_count(purpose);
        let key = loop {
            match self
                .branch(purpose)
                .derive_child(ChildNumber::normal(index))
            {
                Ok(key) => break key,
                // The ~2^-127 invalid-scalar case: skip the index.
                Err(KeyError::DerivationOutOfRange) => index += 1,
                Err(error) => return Err(error),
            }
        };

        let entry = IssuedKey {
            key,
            purpose,
            index,
        };
        let hash = entry.key.key().pub_key_hash();
        self.issued.push(entry);
        self.by_pub_key_hash.insert(hash, self.issued.len() - 1);
        Ok(self.issued.last().expect("just pushed"))
    }

    /// A fresh receive address.
    pub fn fresh_receive_address(&mut self) -> Result<Address, KeyError> {
        let network = self.network;
        let issued = self.issue_key(KeyPurpose::External)?;
        Ok(Address::p2pkh(issued.key.key().public_key(), network))
    }

    /// A fresh change address.
    pub fn fresh_change_address(&mut self) -> Result<Address, KeyError> {
        let network = self.network;
        let issued = self.issue_key(KeyPurpose::Internal)?;
        Ok(Address::p2pkh(issued.key.key().public_key(), network))
    }

    /// All issued keys.
    pub fn issued_keys(&self) -> &[IssuedKey] {
        &self.issued
    }

    /// The issued key whose P2PKH/P2WPKH form `script` pays, if any.
    pub fn find_key_for_script(&self, script: &Script) -> Option<&IssuedKey> {
        let hash = match template::classify(script) {
            template::TemplateKind::PayToPubKeyHash(hash) => hash,
            template::TemplateKind::WitnessPubKeyHash(hash) => hash,
            template::TemplateKind::PayToPubKey(pub_key) => {
                kestrel_chain::transparent::hash160(&pub_key)
            }
            _ => return None,
        };
        self.find_key_for_pub_key_hash(&hash)
    }

    /// The issued key with this public key hash, if any.
    pub fn find_key_for_pub_key_hash(&self, hash: &[u8; 20]) -> Option<&IssuedKey> {
        self.by_pub_key_hash
            .get(hash)
            .map(|&index| &self.issued[index])
    }

    /// Whether `script` pays this wallet.
    pub fn is_mine(&self, script: &Script) -> bool {
        self.find_key_for_script(script).is_some()
    }

    /// The byte elements the bloom filter must match: every issued public
    /// key and its hash160.
    pub fn filter_elements(&self) -> Vec<Vec<u8>> {
        let mut elements = Vec::with_capacity(self.issued.len() * 2);
        for issued in self.issued.iter() {
            elements.push(issued.key.key().serialize_public());
            elements.push(issued.key.key().pub_key_hash().to_vec());
        }
        elements
    }

    /// Issued keys created before `cutoff`; the rotation sweeper retires
    /// their coins.
    pub fn keys_created_before(&self, cutoff: u32) -> Vec<&IssuedKey> {
        self.issued
            .iter()
            .filter(|issued| issued.key.key().creation_time() < cutoff)
            .filter(|issued| match self.rotation_snapshot {
                Some((external, internal)) => match issued.purpose {
                    KeyPurpose::External => issued.index < external,
                    KeyPurpose::Internal => issued.index < internal,
                },
                None => true,
            })
            .collect()
    }

    /// Whether secret material is currently locked.
    pub fn is_encrypted(&self) -> bool {
        self.seed.is_encrypted()
    }

    /// Encrypt the chain under `passphrase`.
    ///
    /// Chain codes and public keys stay cleartext, so address generation
    /// and matching keep working while locked; only signing needs the
    /// passphrase again.
    pub fn encrypt(&mut self, passphrase: &str) -> Result<(), KeyError> {
        let crypter = KeyCrypter::new(ScryptParameters::random());
        let aes_key = crypter.derive_key(passphrase)?;

        self.seed = self.seed.encrypt(&crypter, &aes_key)?;
        for issued in self.issued.iter_mut() {
            let locked_key = issued.key.key().encrypt(&crypter, &aes_key)?;
            issued.key = DeterministicKey::from_parts(
                locked_key,
                *issued.key.chain_code(),
                issued.key.depth(),
                issued.key.child_number(),
                *issued.key.parent_fingerprint(),
            );
        }
        // The branch keys hold secrets too; keep only their public halves.
        self.external = self.external.public_only();
        self.internal = self.internal.public_only();
        self.crypter = Some(crypter);
        Ok(())
    }

    /// Decrypt the chain with `passphrase`, restoring signing ability.
    pub fn decrypt(&mut self, passphrase: &str) -> Result<(), KeyError> {
        let crypter = self.crypter.clone().ok_or(KeyError::MissingPrivateKey)?;
        let aes_key = crypter.derive_key(passphrase)?;

        let seed = self.seed.decrypt(&crypter, &aes_key, "")?;
        let mut unlocked = KeyChain::from_seed(seed, self.network)?;
        unlocked.rotation_time = self.rotation_time;
        unlocked.rotation_snapshot = self.rotation_snapshot;

        // Reissue by matching the stored public keys rather than trusting
        // counts: branch membership survives even when the locked chain
        // couldn't remember which branch a key came from.
        let targets: std::collections::HashSet<[u8; 20]> = self
            .by_pub_key_hash
            .keys()
            .copied()
            .collect();
        unlocked.reissue_matching(&targets)?;

        *self = unlocked;
        Ok(())
    }

    /// Issue keys on both branches while their hashes appear in `targets`.
    ///
    /// Issued indexes are contiguous per branch, so deriving until the
    /// first miss reconstructs exactly the issued set.
    pub(crate) fn reissue_matching(
        &mut self,
        targets: &std::collections::HashSet<[u8; 20]>,
    ) -> Result<(), KeyError> {
        for purpose in [KeyPurpose::External, KeyPurpose::Internal].iter() {
            loop {
                let next_index = self.issued_count(*purpose);
                let candidate = self
                    .branch(*purpose)
                    .derive_child(ChildNumber::normal(next_index))?;
                if !targets.contains(&candidate.key().pub_key_hash()) {
                    break;
                }
                self.issue_key(*purpose)?;
            }
        }
        Ok(())
    }

    /// Rebuild a chain from persisted parts (load path).
    pub(crate) fn restore(
        seed: DeterministicSeed,
        network: Network,
        external_count: u32,
        internal_count: u32,
        crypter: Option<KeyCrypter>,
        locked_keys: Vec<(ECKey, KeyPurpose, u32)>,
    ) -> Result<KeyChain, KeyError> {
        if !seed.is_encrypted() {
            let mut chain = KeyChain::from_seed(seed, network)?;
            for _ in 0..external_count {
                chain.issue_key(KeyPurpose::External)?;
            }
            for _ in 0..internal_count {
                chain.issue_key(KeyPurpose::Internal)?;
            }
            chain.crypter = crypter;
            return Ok(chain);
        }

        // Locked wallet: rebuild from the stored public keys alone.
        let mut issued = Vec::with_capacity(locked_keys.len());
        let mut by_pub_key_hash = HashMap::new();
        for (key, purpose, index) in locked_keys {
            let hash = key.pub_key_hash();
            issued.push(IssuedKey {
                key: DeterministicKey::from_parts(key, [0u8; 32], 0, ChildNumber(0), [0u8; 4]),
                purpose,
                index,
            });
            by_pub_key_hash.insert(hash, issued.len() - 1);
        }

        // Without the seed we cannot derive the branch keys; park public
        // stubs that fail derivation until decrypt() replaces them.
        let placeholder = |key: &ECKey| {
            DeterministicKey::from_parts(key.clone(), [0u8; 32], 0, ChildNumber(0), [0u8; 4])
        };
        let stub = issued
            .first()
            .map(|entry| placeholder(entry.key.key()))
            .ok_or(KeyError::MissingPrivateKey)?;

        Ok(KeyChain {
            network,
            seed,
            external: stub.clone(),
            internal: stub,
            issued,
            by_pub_key_hash,
            crypter,
            rotation_time: None,
            rotation_snapshot: None,
        })
    }
}
