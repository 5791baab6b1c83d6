//! SHA-256d: double SHA-256, the hash behind txids, block hashes, and
//! message checksums.

use sha2::{Digest, Sha256};

/// An `io::Write` adapter that hashes everything written through it.
///
/// Serializing a value into a `Writer` and calling [`Writer::finish`]
/// computes the value's SHA-256d without materializing its byte form.
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl Writer {
    /// Consume the writer, returning the double hash of the bytes written.
    pub fn finish(self) -> [u8; 32] {
        let result1 = self.hash.finalize();
        let result2 = Sha256::digest(&result1);
        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&result2[0..32]);
        buffer
    }
}

impl std::io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Compute the SHA-256d of a byte slice in one call.
pub fn digest(data: &[u8]) -> [u8; 32] {
    let mut writer = Writer::default();
    std::io::Write::write_all(&mut writer, data).expect("sha256d::Writer is infallible");
    writer.finish()
}

/// The first four bytes of a SHA-256d, as used in the message envelope and
/// Base58Check.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(bytes: &'a [u8]) -> Self {
        let hash = digest(bytes);
        let mut checksum = [0u8; 4];
        checksum[0..4].copy_from_slice(&hash[0..4]);
        Self(checksum)
    }
}

impl Default for Checksum {
    fn default() -> Self {
        // The checksum of an empty payload (e.g. a bare `verack`).
        Checksum::from(&[][..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_payload() {
        // sha256d("") starts with 5df6e0e2.
        assert_eq!(Checksum::default().0, [0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn writer_matches_one_shot_digest() {
        let mut writer = Writer::default();
        std::io::Write::write_all(&mut writer, b"kestrel").unwrap();
        assert_eq!(writer.finish(), digest(b"kestrel"));
    }
}
