use std::io;

use thiserror::Error;

/// A serialization or deserialization error.
#[derive(Error, Debug)]
pub enum SerializationError {
    /// An io error that prevented deserialization
    #[error("io error: {0}")]
    Io(io::Error),
    /// The input ended before the value it framed was complete.
    #[error("unexpected end of input")]
    Truncated,
    /// A length prefix exceeded the bound its context allows.
    #[error("length {len} exceeds the maximum of {max}")]
    TooLong {
        /// The length the input claimed.
        len: u64,
        /// The largest length acceptable here.
        max: u64,
    },
    /// A variable-length integer used more bytes than its value requires.
    ///
    /// Consensus rejects the three non-minimal encodings so that every value
    /// has exactly one byte representation.
    #[error("non-canonical variable-length integer")]
    NonCanonicalCompactInt,
    /// The data to be deserialized was malformed.
    #[error("parse error: {0}")]
    Parse(&'static str),
}

impl From<io::Error> for SerializationError {
    fn from(e: io::Error) -> Self {
        // Running out of bytes mid-value is a framing fault, not an I/O
        // fault: decoding from a slice must report it the same way decoding
        // from a socket does.
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SerializationError::Truncated
        } else {
            SerializationError::Io(e)
        }
    }
}
