//! The on-disk wallet envelope.
//!
//! A flat stream of records, each framed as `varint length || type u8 ||
//! body`, closed by a CRC32 (little-endian) of every preceding byte.
//! Record types:
//!
//! | type | body |
//! |---|---|
//! | 1 | unencrypted key: creation_time u32, compressed u8, secret 32b, pub len-prefixed |
//! | 2 | encrypted key: creation_time u32, compressed u8, iv 16b, ciphertext len-prefixed, pub len-prefixed |
//! | 3 | transaction: consensus-serialized tx, pool tag u8, confidence record |
//! | 4 | last block seen: hash 32b, height u32 |
//! | 5 | scrypt parameters: N u64, r u32, p u32, salt len-prefixed |
//! | 6 | seed: mnemonic payload len-prefixed, iv 16b, creation_time u32 |
//!
//! An all-zero IV in record 6 marks a cleartext mnemonic (unencrypted
//! wallet); anything else is AES ciphertext under the record-5 scrypt key.
//!
//! The confidence record inside type 3 is: kind u8 (0 unknown, 1 building,
//! 2 pending, 3 dead, 4 in-conflict), then for building `height u32,
//! depth u32`, for dead `has_replacement u8 [txid 32b]`, then source u8
//! (0 unknown, 1 own, 2 network).

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use kestrel_chain::block;
use kestrel_chain::compactint::CompactInt;
use kestrel_chain::parameters::Network;
use kestrel_chain::serialization::{read_limited_bytes, BitcoinDeserialize, BitcoinSerialize};
use kestrel_chain::transaction::{self, Transaction};
use kestrel_keys::{DeterministicSeed, ECKey, EncryptedData, KeyCrypter, ScryptParameters};

use crate::confidence::{ConfidenceKind, Source, TxConfidence};
use crate::keychain::KeyChain;
use crate::wallet::{Config, Pool, TxPurpose, Wallet, WalletTx};
use crate::WalletError;

const RECORD_KEY: u8 = 1;
const RECORD_ENCRYPTED_KEY: u8 = 2;
const RECORD_TRANSACTION: u8 = 3;
const RECORD_LAST_BLOCK: u8 = 4;
const RECORD_SCRYPT: u8 = 5;
const RECORD_SEED: u8 = 6;

/// The largest single record we will read.
const MAX_RECORD_BYTES: u64 = 1_100_000;

fn write_record<W: Write>(mut out: W, record_type: u8, body: &[u8]) -> std::io::Result<()> {
    CompactInt::from(1 + body.len()).bitcoin_serialize(&mut out)?;
    out.write_all(&[record_type])?;
    out.write_all(body)
}

/// Serialize the whole wallet into envelope bytes.
pub fn serialize_wallet(wallet: &Wallet) -> Result<Vec<u8>, WalletError> {
    let mut out = Vec::new();
    let keychain = wallet.keychain();

    // 5: scrypt parameters, when the wallet is encrypted.
    if let Some(crypter) = keychain.crypter() {
        let parameters = crypter.parameters();
        let mut body = Vec::new();
        parameters.n.bitcoin_serialize(&mut body)?;
        parameters.r.bitcoin_serialize(&mut body)?;
        parameters.p.bitcoin_serialize(&mut body)?;
        parameters.salt.bitcoin_serialize(&mut body)?;
        write_record(&mut out, RECORD_SCRYPT, &body)?;
    }

    // 6: the seed.
    {
        let seed = keychain.seed();
        let mut body = Vec::new();
        match seed.encrypted_mnemonic() {
            Some(encrypted) => {
                encrypted.ciphertext.bitcoin_serialize(&mut body)?;
                encrypted.iv.bitcoin_serialize(&mut body)?;
            }
            None => {
                let mnemonic = seed.mnemonic()?;
                mnemonic.as_bytes().to_vec().bitcoin_serialize(&mut body)?;
                [0u8; 16].bitcoin_serialize(&mut body)?;
            }
        }
        seed.creation_time().bitcoin_serialize(&mut body)?;
        write_record(&mut out, RECORD_SEED, &body)?;
    }

    // 1/2: issued keys.
    for issued in keychain.issued_keys() {
        let key = issued.key.key();
        let mut body = Vec::new();
        key.creation_time().bitcoin_serialize(&mut body)?;
        body.push(key.is_compressed() as u8);

        if let Some(encrypted) = key.encrypted_secret() {
            encrypted.iv.bitcoin_serialize(&mut body)?;
            encrypted.ciphertext.bitcoin_serialize(&mut body)?;
            key.serialize_public().bitcoin_serialize(&mut body)?;
            write_record(&mut out, RECORD_ENCRYPTED_KEY, &body)?;
        } else if key.has_secret() {
            body.extend_from_slice(&key.secret_bytes()?);
            key.serialize_public().bitcoin_serialize(&mut body)?;
            write_record(&mut out, RECORD_KEY, &body)?;
        } else {
            // Public-only keys are reconstructed from the seed on load.
            continue;
        }
    }

    // 3: transactions with pool tags and confidence.
    for (_, entry) in wallet.entries() {
        let mut body = Vec::new();
        entry.transaction.bitcoin_serialize(&mut body)?;
        body.push(entry.pool.tag());
        write_confidence(&mut body, &entry.confidence)?;
        write_record(&mut out, RECORD_TRANSACTION, &body)?;
    }

    // 4: sync position.
    if let Some((hash, height)) = wallet.last_block_seen() {
        let mut body = Vec::new();
        hash.bitcoin_serialize(&mut body)?;
        height.0.bitcoin_serialize(&mut body)?;
        write_record(&mut out, RECORD_LAST_BLOCK, &body)?;
    }

    // Trailer: CRC32 of everything above.
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&out);
    let crc = hasher.finalize();
    out.extend_from_slice(&crc.to_le_bytes());

    Ok(out)
}

fn write_confidence<W: Write>(mut out: W, confidence: &TxConfidence) -> std::io::Result<()> {
    match &confidence.kind {
        ConfidenceKind::Unknown => out.write_all(&[0])?,
        ConfidenceKind::Building { height, depth } => {
            out.write_all(&[1])?;
            height.0.bitcoin_serialize(&mut out)?;
            depth.bitcoin_serialize(&mut out)?;
        }
        ConfidenceKind::Pending => out.write_all(&[2])?,
        ConfidenceKind::Dead { replacement } => {
            out.write_all(&[3])?;
            match replacement {
                Some(txid) => {
                    out.write_all(&[1])?;
                    txid.bitcoin_serialize(&mut out)?;
                }
                None => out.write_all(&[0])?,
            }
        }
        ConfidenceKind::InConflict => out.write_all(&[4])?,
    }
    let source = match confidence.source {
        Source::Unknown => 0u8,
        Source::Own => 1,
        Source::NetworkBroadcast => 2,
    };
    out.write_all(&[source])
}

fn read_confidence<R: Read>(mut reader: R) -> Result<TxConfidence, WalletError> {
    let kind = match u8::bitcoin_deserialize(&mut reader)? {
        0 => ConfidenceKind::Unknown,
        1 => ConfidenceKind::Building {
            height: block::Height(u32::bitcoin_deserialize(&mut reader)?),
            depth: u32::bitcoin_deserialize(&mut reader)?,
        },
        2 => ConfidenceKind::Pending,
        3 => {
            let replacement = match u8::bitcoin_deserialize(&mut reader)? {
                0 => None,
                1 => Some(transaction::Hash::bitcoin_deserialize(&mut reader)?),
                _ => return Err(WalletError::Corrupt("bad replacement flag")),
            };
            ConfidenceKind::Dead { replacement }
        }
        4 => ConfidenceKind::InConflict,
        _ => return Err(WalletError::Corrupt("bad confidence kind")),
    };
    let source = match u8::bitcoin_deserialize(&mut reader)? {
        0 => Source::Unknown,
        1 => Source::Own,
        2 => Source::NetworkBroadcast,
        _ => return Err(WalletError::Corrupt("bad confidence source")),
    };
    Ok(TxConfidence {
        kind,
        source,
        seen_by_peers: Default::default(),
    })
}

/// Parse envelope bytes back into a wallet.
pub fn deserialize_wallet(
    bytes: &[u8],
    network: Network,
    config: Config,
) -> Result<Wallet, WalletError> {
    if bytes.len() < 4 {
        return Err(WalletError::Corrupt("file shorter than its trailer"));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 4);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(body);
    let expected = hasher.finalize().to_le_bytes();
    if trailer != &expected[..] {
        return Err(WalletError::Corrupt("checksum mismatch"));
    }

    let mut reader = Cursor::new(body);

    let mut scrypt: Option<ScryptParameters> = None;
    let mut seed: Option<(Vec<u8>, [u8; 16], u32)> = None;
    let mut plain_keys: Vec<ECKey> = Vec::new();
    let mut locked_keys: Vec<ECKey> = Vec::new();
    let mut transactions: Vec<WalletTx> = Vec::new();
    let mut last_block: Option<(block::Hash, block::Height)> = None;

    while (reader.position() as usize) < body.len() {
        let record = read_limited_bytes(&mut reader, MAX_RECORD_BYTES)?;
        if record.is_empty() {
            return Err(WalletError::Corrupt("empty record"));
        }
        let mut record_reader = Cursor::new(&record[1..]);
        match record[0] {
            RECORD_SCRYPT => {
                scrypt = Some(ScryptParameters {
                    n: u64::bitcoin_deserialize(&mut record_reader)?,
                    r: u32::bitcoin_deserialize(&mut record_reader)?,
                    p: u32::bitcoin_deserialize(&mut record_reader)?,
                    salt: read_limited_bytes(&mut record_reader, 64)?,
                });
            }
            RECORD_SEED => {
                let payload = read_limited_bytes(&mut record_reader, 4096)?;
                let iv = <[u8; 16]>::bitcoin_deserialize(&mut record_reader)?;
                let creation_time = u32::bitcoin_deserialize(&mut record_reader)?;
                seed = Some((payload, iv, creation_time));
            }
            RECORD_KEY => {
                let creation_time = u32::bitcoin_deserialize(&mut record_reader)?;
                let compressed = u8::bitcoin_deserialize(&mut record_reader)? != 0;
                let mut secret = [0u8; 32];
                record_reader.read_exact(&mut secret)?;
                let _public = read_limited_bytes(&mut record_reader, 65)?;
                plain_keys.push(ECKey::from_secret_bytes(&secret, compressed, creation_time)?);
            }
            RECORD_ENCRYPTED_KEY => {
                let creation_time = u32::bitcoin_deserialize(&mut record_reader)?;
                let _compressed = u8::bitcoin_deserialize(&mut record_reader)? != 0;
                let iv = <[u8; 16]>::bitcoin_deserialize(&mut record_reader)?;
                let ciphertext = read_limited_bytes(&mut record_reader, 96)?;
                let public = read_limited_bytes(&mut record_reader, 65)?;
                locked_keys.push(ECKey::from_encrypted(
                    EncryptedData { iv, ciphertext },
                    &public,
                    creation_time,
                )?);
            }
            RECORD_TRANSACTION => {
                let tx = Transaction::bitcoin_deserialize(&mut record_reader)?;
                let pool = Pool::from_tag(u8::bitcoin_deserialize(&mut record_reader)?)
                    .ok_or(WalletError::Corrupt("bad pool tag"))?;
                let confidence = read_confidence(&mut record_reader)?;
                transactions.push(WalletTx {
                    transaction: tx,
                    pool,
                    confidence,
                    appeared_in: None,
                    side_chain_blocks: Vec::new(),
                    purpose: TxPurpose::Unknown,
                });
            }
            RECORD_LAST_BLOCK => {
                let hash = block::Hash::bitcoin_deserialize(&mut record_reader)?;
                let height = block::Height(u32::bitcoin_deserialize(&mut record_reader)?);
                last_block = Some((hash, height));
            }
            _ => return Err(WalletError::Corrupt("unknown record type")),
        }
    }

    let (seed_payload, seed_iv, seed_creation) =
        seed.ok_or(WalletError::Corrupt("missing seed record"))?;

    let crypter = scrypt.map(KeyCrypter::new);
    let keychain = if seed_iv == [0u8; 16] {
        // Cleartext mnemonic: rebuild the whole chain from the seed and
        // reissue the stored keys branch by branch.
        let sentence = String::from_utf8(seed_payload)
            .map_err(|_| WalletError::Corrupt("seed mnemonic is not utf-8"))?;
        let seed = DeterministicSeed::from_mnemonic(&sentence, "", seed_creation)
            .map_err(|_| WalletError::Corrupt("seed mnemonic fails its checksum"))?;
        let mut chain = KeyChain::from_seed(seed, network)?;
        let targets: std::collections::HashSet<[u8; 20]> = plain_keys
            .iter()
            .map(|key| key.pub_key_hash())
            .collect();
        chain.reissue_matching(&targets)?;
        chain
    } else {
        // Encrypted wallet: keys stay locked until decrypt().
        let seed = DeterministicSeed::from_encrypted(
            EncryptedData {
                iv: seed_iv,
                ciphertext: seed_payload,
            },
            seed_creation,
        );
        let locked: Vec<_> = locked_keys
            .into_iter()
            .enumerate()
            .map(|(index, key)| (key, crate::keychain::KeyPurpose::External, index as u32))
            .collect();
        KeyChain::restore(seed, network, 0, 0, crypter.clone(), locked)?
    };

    let mut wallet = Wallet::from_keychain(keychain, config);
    wallet.set_last_block_seen(last_block);
    for entry in transactions {
        wallet.insert_loaded(entry);
    }
    Ok(wallet)
}

/// Save/load against the filesystem, with the retry-then-freeze policy.
pub struct WalletStore {
    path: PathBuf,
    consecutive_failures: u8,
}

impl WalletStore {
    /// A store writing to `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> WalletStore {
        WalletStore {
            path: path.into(),
            consecutive_failures: 0,
        }
    }

    /// The wallet file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a wallet from disk.
    pub fn load(&self, network: Network, config: Config) -> Result<Wallet, WalletError> {
        let bytes = std::fs::read(&self.path)?;
        deserialize_wallet(&bytes, network, config)
    }

    fn write_once(&self, wallet: &Wallet) -> Result<(), WalletError> {
        let bytes = serialize_wallet(wallet)?;
        // Write-then-rename keeps a crash from destroying the previous
        // good file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Save, retrying once after a short backoff. A second failure flips
    /// the wallet read-only and notifies its listeners.
    pub fn save(&mut self, wallet: &mut Wallet) -> Result<(), WalletError> {
        if wallet.is_read_only() {
            return Err(WalletError::ReadOnly);
        }

        match self.write_once(wallet) {
            Ok(()) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(first_error) => {
                warn!(error = %first_error, "wallet save failed; retrying");
                std::thread::sleep(std::time::Duration::from_millis(250));
                match self.write_once(wallet) {
                    Ok(()) => {
                        self.consecutive_failures = 0;
                        Ok(())
                    }
                    Err(second_error) => {
                        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                        error!(
                            error = %second_error,
                            "wallet save failed twice; freezing wallet read-only"
                        );
                        wallet.set_read_only();
                        Err(second_error)
                    }
                }
            }
        }
    }
}

