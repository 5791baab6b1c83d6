//! Transparent address types.

use std::{fmt, io};

use bech32::{FromBase32, ToBase32, Variant};
use ripemd160::{Digest, Ripemd160};
use secp256k1::PublicKey;
use sha2::{Digest as Sha2Digest, Sha256};

#[cfg(test)]
use proptest::{arbitrary::Arbitrary, collection::vec, prelude::*};

use crate::{
    parameters::Network,
    serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError},
};

use super::Script;

/// Version bytes prepended to base58check address payloads.
mod magics {
    pub mod p2sh {
        pub const MAINNET: [u8; 1] = [0x05];
        pub const TESTNET: [u8; 1] = [0xc4];
    }

    pub mod p2pkh {
        pub const MAINNET: [u8; 1] = [0x00];
        pub const TESTNET: [u8; 1] = [0x6f];
    }
}

/// A Bitcoin address.
///
/// Legacy addresses prepend a version byte to a 20-byte hash, append a
/// 4-byte SHA-256d checksum, and Base58Check-encode the result. Segwit
/// addresses Bech32-encode a witness version and program with a
/// network-specific human-readable part.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub enum Address {
    /// P2SH (pay to script hash).
    PayToScriptHash {
        /// Production, test, or local network.
        network: Network,
        /// RIPEMD-160 of the SHA-256 of the redeem script.
        script_hash: [u8; 20],
    },
    /// P2PKH (pay to public key hash).
    PayToPublicKeyHash {
        /// Production, test, or local network.
        network: Network,
        /// RIPEMD-160 of the SHA-256 of the public key encoding.
        pub_key_hash: [u8; 20],
    },
    /// P2WPKH (version-0 witness program, 20 bytes).
    WitnessPubKeyHash {
        /// Production, test, or local network.
        network: Network,
        /// RIPEMD-160 of the SHA-256 of the compressed public key.
        pub_key_hash: [u8; 20],
    },
    /// P2WSH (version-0 witness program, 32 bytes).
    WitnessScriptHash {
        /// Production, test, or local network.
        network: Network,
        /// SHA-256 of the witness script.
        script_hash: [u8; 32],
    },
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut debug_struct = f.debug_struct("Address");

        match self {
            Address::PayToScriptHash {
                network,
                script_hash,
            } => debug_struct
                .field("network", network)
                .field("script_hash", &hex::encode(script_hash))
                .finish(),
            Address::PayToPublicKeyHash {
                network,
                pub_key_hash,
            } => debug_struct
                .field("network", network)
                .field("pub_key_hash", &hex::encode(pub_key_hash))
                .finish(),
            Address::WitnessPubKeyHash {
                network,
                pub_key_hash,
            } => debug_struct
                .field("network", network)
                .field("witness_pub_key_hash", &hex::encode(pub_key_hash))
                .finish(),
            Address::WitnessScriptHash {
                network,
                script_hash,
            } => debug_struct
                .field("network", network)
                .field("witness_script_hash", &hex::encode(script_hash))
                .finish(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::WitnessPubKeyHash {
                network,
                pub_key_hash,
            } => write_bech32(f, *network, &pub_key_hash[..]),
            Address::WitnessScriptHash {
                network,
                script_hash,
            } => write_bech32(f, *network, &script_hash[..]),
            _ => {
                let mut bytes = io::Cursor::new(Vec::new());
                let _ = self.bitcoin_serialize(&mut bytes);
                f.write_str(&bs58::encode(bytes.get_ref()).with_check().into_string())
            }
        }
    }
}

fn write_bech32(f: &mut fmt::Formatter, network: Network, program: &[u8]) -> fmt::Result {
    let hrp = match network {
        Network::Mainnet => "bc",
        Network::Testnet => "tb",
        Network::Regtest => "bcrt",
    };
    let mut data = vec![bech32::u5::try_from_u8(0).expect("0 is a valid u5")];
    data.extend(program.to_base32());
    let encoded = bech32::encode(hrp, data, Variant::Bech32).map_err(|_| fmt::Error)?;
    f.write_str(&encoded)
}

impl std::str::FromStr for Address {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Try bech32 first: its character set is unambiguous.
        if let Ok((hrp, data, Variant::Bech32)) = bech32::decode(s) {
            let network = match hrp.as_str() {
                "bc" => Network::Mainnet,
                "tb" => Network::Testnet,
                "bcrt" => Network::Regtest,
                _ => return Err(SerializationError::Parse("unknown bech32 prefix")),
            };
            let (version, program) = data
                .split_first()
                .ok_or(SerializationError::Parse("empty bech32 payload"))?;
            if version.to_u8() != 0 {
                return Err(SerializationError::Parse("unsupported witness version"));
            }
            let program = Vec::<u8>::from_base32(program)
                .map_err(|_| SerializationError::Parse("bad bech32 padding"))?;
            return match program.len() {
                20 => {
                    let mut hash = [0u8; 20];
                    hash.copy_from_slice(&program);
                    Ok(Address::WitnessPubKeyHash {
                        network,
                        pub_key_hash: hash,
                    })
                }
                32 => {
                    let mut hash = [0u8; 32];
                    hash.copy_from_slice(&program);
                    Ok(Address::WitnessScriptHash {
                        network,
                        script_hash: hash,
                    })
                }
                _ => Err(SerializationError::Parse("bad witness program length")),
            };
        }

        match &bs58::decode(s).with_check(None).into_vec() {
            Ok(bytes) => Self::bitcoin_deserialize(&bytes[..]),
            Err(_) => Err(SerializationError::Parse("address decoding error")),
        }
    }
}

/// Legacy addresses serialize as version byte plus hash; the Base58Check
/// wrapper is applied by `Display`.
impl BitcoinSerialize for Address {
    fn bitcoin_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Address::PayToScriptHash {
                network,
                script_hash,
            } => {
                match *network {
                    Network::Mainnet => writer.write_all(&magics::p2sh::MAINNET[..])?,
                    _ => writer.write_all(&magics::p2sh::TESTNET[..])?,
                }
                writer.write_all(script_hash)?
            }
            Address::PayToPublicKeyHash {
                network,
                pub_key_hash,
            } => {
                match *network {
                    Network::Mainnet => writer.write_all(&magics::p2pkh::MAINNET[..])?,
                    _ => writer.write_all(&magics::p2pkh::TESTNET[..])?,
                }
                writer.write_all(pub_key_hash)?
            }
            Address::WitnessPubKeyHash { .. } | Address::WitnessScriptHash { .. } => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "segwit addresses have no base58 form",
                ))
            }
        }

        Ok(())
    }
}

impl BitcoinDeserialize for Address {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let mut version_bytes = [0; 1];
        reader.read_exact(&mut version_bytes)?;

        let mut hash_bytes = [0; 20];
        reader.read_exact(&mut hash_bytes)?;

        match version_bytes {
            magics::p2sh::MAINNET => Ok(Address::PayToScriptHash {
                network: Network::Mainnet,
                script_hash: hash_bytes,
            }),
            magics::p2sh::TESTNET => Ok(Address::PayToScriptHash {
                network: Network::Testnet,
                script_hash: hash_bytes,
            }),
            magics::p2pkh::MAINNET => Ok(Address::PayToPublicKeyHash {
                network: Network::Mainnet,
                pub_key_hash: hash_bytes,
            }),
            magics::p2pkh::TESTNET => Ok(Address::PayToPublicKeyHash {
                network: Network::Testnet,
                pub_key_hash: hash_bytes,
            }),
            _ => Err(SerializationError::Parse("bad addr version/type")),
        }
    }
}

impl Address {
    /// The P2PKH address of a compressed public key.
    pub fn p2pkh(pub_key: &PublicKey, network: Network) -> Address {
        Address::PayToPublicKeyHash {
            network,
            pub_key_hash: hash160(&pub_key.serialize()[..]),
        }
    }

    /// The P2SH address of a redeem script.
    pub fn p2sh(redeem_script: &Script, network: Network) -> Address {
        Address::PayToScriptHash {
            network,
            script_hash: hash160(redeem_script.as_bytes()),
        }
    }

    /// The P2WPKH address of a compressed public key.
    pub fn p2wpkh(pub_key: &PublicKey, network: Network) -> Address {
        Address::WitnessPubKeyHash {
            network,
            pub_key_hash: hash160(&pub_key.serialize()[..]),
        }
    }

    /// The network this address belongs to.
    pub fn network(&self) -> Network {
        match self {
            Address::PayToScriptHash { network, .. }
            | Address::PayToPublicKeyHash { network, .. }
            | Address::WitnessPubKeyHash { network, .. }
            | Address::WitnessScriptHash { network, .. } => *network,
        }
    }

    /// The lock script paying this address.
    pub fn lock_script(&self) -> Script {
        match self {
            Address::PayToPublicKeyHash { pub_key_hash, .. } => {
                // DUP HASH160 <20> EQUALVERIFY CHECKSIG
                let mut script = Vec::with_capacity(25);
                script.extend_from_slice(&[0x76, 0xa9, 0x14]);
                script.extend_from_slice(pub_key_hash);
                script.extend_from_slice(&[0x88, 0xac]);
                Script(script)
            }
            Address::PayToScriptHash { script_hash, .. } => {
                // HASH160 <20> EQUAL
                let mut script = Vec::with_capacity(23);
                script.extend_from_slice(&[0xa9, 0x14]);
                script.extend_from_slice(script_hash);
                script.push(0x87);
                Script(script)
            }
            Address::WitnessPubKeyHash { pub_key_hash, .. } => {
                // OP_0 <20>
                let mut script = Vec::with_capacity(22);
                script.extend_from_slice(&[0x00, 0x14]);
                script.extend_from_slice(pub_key_hash);
                Script(script)
            }
            Address::WitnessScriptHash { script_hash, .. } => {
                // OP_0 <32>
                let mut script = Vec::with_capacity(34);
                script.extend_from_slice(&[0x00, 0x20]);
                script.extend_from_slice(script_hash);
                Script(script)
            }
        }
    }

    /// Recover the address a standard lock script pays, if it is standard.
    pub fn from_lock_script(script: &Script, network: Network) -> Option<Address> {
        let bytes = script.as_bytes();
        match bytes {
            [0x76, 0xa9, 0x14, hash @ .., 0x88, 0xac] if hash.len() == 20 => {
                let mut pub_key_hash = [0u8; 20];
                pub_key_hash.copy_from_slice(hash);
                Some(Address::PayToPublicKeyHash {
                    network,
                    pub_key_hash,
                })
            }
            [0xa9, 0x14, hash @ .., 0x87] if hash.len() == 20 => {
                let mut script_hash = [0u8; 20];
                script_hash.copy_from_slice(hash);
                Some(Address::PayToScriptHash {
                    network,
                    script_hash,
                })
            }
            [0x00, 0x14, hash @ ..] if hash.len() == 20 => {
                let mut pub_key_hash = [0u8; 20];
                pub_key_hash.copy_from_slice(hash);
                Some(Address::WitnessPubKeyHash {
                    network,
                    pub_key_hash,
                })
            }
            [0x00, 0x20, hash @ ..] if hash.len() == 32 => {
                let mut script_hash = [0u8; 32];
                script_hash.copy_from_slice(hash);
                Some(Address::WitnessScriptHash {
                    network,
                    script_hash,
                })
            }
            _ => None,
        }
    }
}

/// RIPEMD-160 of SHA-256, the 20-byte hash behind P2PKH and P2SH.
pub fn hash160(bytes: &[u8]) -> [u8; 20] {
    let sha_hash = Sha256::digest(bytes);
    let ripe_hash = Ripemd160::digest(&sha_hash);
    let mut payload = [0u8; 20];
    payload[..].copy_from_slice(&ripe_hash[..]);
    payload
}

#[cfg(test)]
impl Address {
    fn p2pkh_strategy() -> impl Strategy<Value = Self> {
        (any::<Network>(), vec(any::<u8>(), 20))
            .prop_map(|(network, payload_bytes)| {
                let mut bytes = [0; 20];
                bytes.copy_from_slice(payload_bytes.as_slice());
                Self::PayToPublicKeyHash {
                    network,
                    pub_key_hash: bytes,
                }
            })
            .boxed()
    }

    fn p2sh_strategy() -> impl Strategy<Value = Self> {
        (any::<Network>(), vec(any::<u8>(), 20))
            .prop_map(|(network, payload_bytes)| {
                let mut bytes = [0; 20];
                bytes.copy_from_slice(payload_bytes.as_slice());
                Self::PayToScriptHash {
                    network,
                    script_hash: bytes,
                }
            })
            .boxed()
    }
}

#[cfg(test)]
impl Arbitrary for Address {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        prop_oneof![Self::p2pkh_strategy(), Self::p2sh_strategy()].boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_roundtrip_through_string() {
        kestrel_test::init();

        let addr = Address::PayToPublicKeyHash {
            network: Network::Mainnet,
            pub_key_hash: [0; 20],
        };
        let encoded = addr.to_string();
        assert_eq!(encoded, "1111111111111111111114oLvT2");
        assert_eq!(encoded.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn p2sh_mainnet_display() {
        kestrel_test::init();

        let addr = Address::p2sh(&Script(vec![0; 20]), Network::Mainnet);
        assert_eq!(format!("{}", addr), "3FDDHcFYKGeWDagq4rXnDSrmzbXjDhP97D");
    }

    #[test]
    fn segwit_roundtrip_through_string() {
        kestrel_test::init();

        let addr = Address::WitnessPubKeyHash {
            network: Network::Mainnet,
            pub_key_hash: [0x11; 20],
        };
        let encoded = addr.to_string();
        assert!(encoded.starts_with("bc1q"));
        assert_eq!(encoded.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn lock_script_roundtrip() {
        kestrel_test::init();

        for addr in [
            Address::PayToPublicKeyHash {
                network: Network::Testnet,
                pub_key_hash: [7; 20],
            },
            Address::PayToScriptHash {
                network: Network::Testnet,
                script_hash: [8; 20],
            },
            Address::WitnessPubKeyHash {
                network: Network::Testnet,
                pub_key_hash: [9; 20],
            },
            Address::WitnessScriptHash {
                network: Network::Testnet,
                script_hash: [10; 32],
            },
        ]
        .iter()
        {
            let script = addr.lock_script();
            assert_eq!(
                Address::from_lock_script(&script, Network::Testnet).as_ref(),
                Some(addr)
            );
        }
    }

    #[test]
    fn from_string() {
        kestrel_test::init();

        let addr: Address = "3Q7achm1qfMPzMiKQYafAPcPhn3hvcBaRL".parse().unwrap();
        assert_eq!(format!("{}", addr), "3Q7achm1qfMPzMiKQYafAPcPhn3hvcBaRL");
    }
}
