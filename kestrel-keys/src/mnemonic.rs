//! BIP-39 mnemonic encoding of wallet entropy.
//!
//! Entropy maps to words at 11 bits per word, with a checksum of
//! `entropy_bits / 32` bits taken from the front of the entropy's SHA-256.
//! The seed fed to BIP-32 is PBKDF2-HMAC-SHA-512 over the mnemonic
//! sentence, 2048 iterations, salted with `"mnemonic" || passphrase`.

mod wordlist;

use hmac::Hmac;
use sha2::{Digest, Sha256, Sha512};

use crate::KeyError;
pub use wordlist::WORDS;

/// The smallest allowed entropy, in bits.
pub const MIN_ENTROPY_BITS: usize = 128;
/// The largest allowed entropy, in bits.
pub const MAX_ENTROPY_BITS: usize = 512;
/// PBKDF2 iteration count fixed by the mnemonic standard.
const SEED_ITERATIONS: u32 = 2048;

/// Encode entropy as a mnemonic word sequence.
///
/// The entropy bit length must be a multiple of 32 between 128 and 512.
pub fn entropy_to_mnemonic(entropy: &[u8]) -> Result<Vec<&'static str>, KeyError> {
    check_entropy_len(entropy.len())?;

    let entropy_bits = entropy.len() * 8;
    let checksum_bits = entropy_bits / 32;
    let checksum = Sha256::digest(entropy);

    let mut bits = BitReader::new(entropy, &checksum, checksum_bits);
    let mut words = Vec::with_capacity((entropy_bits + checksum_bits) / 11);
    while let Some(index) = bits.next_index() {
        words.push(WORDS[index]);
    }
    Ok(words)
}

/// Decode a mnemonic back to its entropy, verifying the checksum.
pub fn mnemonic_to_entropy(words: &[&str]) -> Result<Vec<u8>, KeyError> {
    let total_bits = words.len() * 11;
    // total = entropy + entropy/32, so entropy = total * 32 / 33.
    if total_bits % 33 != 0 {
        return Err(KeyError::InvalidMnemonic("wrong word count"));
    }
    let entropy_bits = total_bits * 32 / 33;
    check_entropy_bits(entropy_bits)?;
    let checksum_bits = entropy_bits / 32;

    let mut writer = BitWriter::new();
    for word in words {
        let index = wordlist::index_of(word)
            .ok_or(KeyError::InvalidMnemonic("unknown word"))?;
        writer.push_bits(index as u32, 11);
    }

    let data = writer.finish();
    let entropy = data[..entropy_bits / 8].to_vec();

    // Compare the trailing checksum bits against the recomputed hash.
    let expected = Sha256::digest(&entropy);
    let mut expected_reader = BitReader::raw(&expected);
    let mut actual_reader = BitReader::raw(&data[entropy_bits / 8..]);
    for _ in 0..checksum_bits {
        if expected_reader.next_bit() != actual_reader.next_bit() {
            return Err(KeyError::InvalidMnemonic("checksum mismatch"));
        }
    }

    Ok(entropy)
}

/// Stretch a mnemonic sentence and passphrase into a 64-byte seed.
pub fn to_seed(words: &[&str], passphrase: &str) -> [u8; 64] {
    let sentence = words.join(" ");
    let salt = format!("mnemonic{}", passphrase);

    let mut seed = [0u8; 64];
    pbkdf2::pbkdf2::<Hmac<Sha512>>(
        sentence.as_bytes(),
        salt.as_bytes(),
        SEED_ITERATIONS,
        &mut seed,
    );
    seed
}

fn check_entropy_len(len: usize) -> Result<(), KeyError> {
    check_entropy_bits(len * 8)
}

fn check_entropy_bits(bits: usize) -> Result<(), KeyError> {
    if bits % 32 != 0 || !(MIN_ENTROPY_BITS..=MAX_ENTROPY_BITS).contains(&bits) {
        return Err(KeyError::InvalidMnemonic(
            "entropy must be a multiple of 32 bits between 128 and 512",
        ));
    }
    Ok(())
}

/// Reads 11-bit indices from entropy followed by checksum bits.
struct BitReader<'a> {
    entropy: &'a [u8],
    checksum: &'a [u8],
    checksum_bits: usize,
    position: usize,
}

impl<'a> BitReader<'a> {
    fn new(entropy: &'a [u8], checksum: &'a [u8], checksum_bits: usize) -> Self {
        BitReader {
            entropy,
            checksum,
            checksum_bits,
            position: 0,
        }
    }

    fn raw(bytes: &'a [u8]) -> Self {
        BitReader {
            entropy: bytes,
            checksum: &[],
            checksum_bits: 0,
            position: 0,
        }
    }

    fn total_bits(&self) -> usize {
        self.entropy.len() * 8 + self.checksum_bits
    }

    fn bit_at(&self, position: usize) -> bool {
        let (source, offset) = if position < self.entropy.len() * 8 {
            (self.entropy, position)
        } else {
            (self.checksum, position - self.entropy.len() * 8)
        };
        source[offset / 8] >> (7 - offset % 8) & 1 == 1
    }

    fn next_bit(&mut self) -> bool {
        let bit = self.bit_at(self.position);
        self.position += 1;
        bit
    }

    fn next_index(&mut self) -> Option<usize> {
        if self.position + 11 > self.total_bits() {
            return None;
        }
        let mut index = 0usize;
        for _ in 0..11 {
            index = (index << 1) | self.next_bit() as usize;
        }
        Some(index)
    }
}

/// Accumulates big-endian bits into bytes.
struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            bytes: Vec::new(),
            bit_len: 0,
        }
    }

    fn push_bits(&mut self, value: u32, count: usize) {
        for shift in (0..count).rev() {
            let bit = value >> shift & 1 == 1;
            if self.bit_len % 8 == 0 {
                self.bytes.push(0);
            }
            if bit {
                let last = self.bytes.len() - 1;
                self.bytes[last] |= 1 << (7 - self.bit_len % 8);
            }
            self.bit_len += 1;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wordlist_shape() {
        assert_eq!(WORDS.len(), 2048);
        assert_eq!(WORDS[0], "abandon");
        assert_eq!(WORDS[3], "about");
        assert_eq!(WORDS[2047], "zoo");
    }

    #[test]
    fn zero_entropy_mnemonic() {
        kestrel_test::init();

        // 128 zero bits checksum to 0x37, whose top 4 bits select "about".
        let words = entropy_to_mnemonic(&[0u8; 16]).unwrap();
        assert_eq!(words.len(), 12);
        assert!(words[..11].iter().all(|&word| word == "abandon"));
        assert_eq!(mnemonic_to_entropy(&words).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn roundtrip_various_lengths() {
        kestrel_test::init();

        for &len in &[16usize, 20, 24, 28, 32, 64] {
            let entropy: Vec<u8> = (0..len).map(|byte| byte as u8 ^ 0x5a).collect();
            let words = entropy_to_mnemonic(&entropy).unwrap();
            assert_eq!(words.len(), (len * 8 + len / 4) / 11);
            assert_eq!(mnemonic_to_entropy(&words).unwrap(), entropy, "len {}", len);
        }
    }

    #[test]
    fn checksum_detects_word_swap() {
        kestrel_test::init();

        let entropy = vec![0x77u8; 16];
        let mut words = entropy_to_mnemonic(&entropy).unwrap();
        let replacement = if words[0] == "abandon" { "ability" } else { "abandon" };
        words[0] = replacement;
        // A four-bit checksum misses one swap in sixteen, but it can never
        // silently return the original entropy.
        match mnemonic_to_entropy(&words) {
            Err(_) => {}
            Ok(decoded) => assert_ne!(decoded, entropy),
        }
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert!(entropy_to_mnemonic(&[0u8; 4]).is_err());
        assert!(entropy_to_mnemonic(&[0u8; 17]).is_err());
        assert!(entropy_to_mnemonic(&[0u8; 68]).is_err());
        assert!(mnemonic_to_entropy(&["abandon"; 11]).is_err());
        assert!(mnemonic_to_entropy(&["notaword"; 12]).is_err());
    }

    #[test]
    fn reference_seed_vector() {
        kestrel_test::init();

        // The all-"abandon" 12-word mnemonic with passphrase "TREZOR" is the
        // standard interoperability vector.
        let words = entropy_to_mnemonic(&[0u8; 16]).unwrap();
        let seed = to_seed(&words, "TREZOR");
        assert_eq!(
            hex::encode(&seed[..]),
            "c55257c360c07c72029aebc1b53c05ed0362ada38ead3e3e9efa3708e53495531f09a6987599d18264c1e1c92f2cf141630c7a3c4ab7c81b2f001698e7463b04"
        );
    }

    #[test]
    fn passphrase_changes_seed() {
        kestrel_test::init();

        let words = entropy_to_mnemonic(&[0x42u8; 16]).unwrap();
        assert_ne!(
            to_seed(&words, "")[..],
            to_seed(&words, "passphrase")[..]
        );
    }
}
