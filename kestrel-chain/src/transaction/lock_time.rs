use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use crate::block::Height;
use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A transaction's lock time.
///
/// Raw values below 500,000,000 are block heights; everything else is a Unix
/// timestamp. Zero (`Height(0)`) means the transaction is final immediately.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LockTime {
    /// Unlocked at or after this block height.
    Height(Height),
    /// Unlocked at or after this time.
    Time(DateTime<Utc>),
}

impl LockTime {
    /// The first raw value interpreted as a timestamp rather than a height.
    pub const MIN_TIMESTAMP: i64 = 500_000_000;

    /// A lock time that never locks anything.
    pub fn unlocked() -> LockTime {
        LockTime::Height(Height(0))
    }

    /// The raw u32 this lock time serializes to.
    pub fn raw(self) -> u32 {
        match self {
            LockTime::Height(Height(height)) => height,
            LockTime::Time(time) => time.timestamp() as u32,
        }
    }
}

impl From<u32> for LockTime {
    fn from(raw: u32) -> Self {
        if i64::from(raw) < LockTime::MIN_TIMESTAMP {
            LockTime::Height(Height(raw))
        } else {
            LockTime::Time(Utc.timestamp(raw.into(), 0))
        }
    }
}

impl Default for LockTime {
    fn default() -> Self {
        LockTime::unlocked()
    }
}

impl BitcoinSerialize for LockTime {
    fn bitcoin_serialize<W: io::Write>(&self, mut target: W) -> Result<(), io::Error> {
        target.write_u32::<LittleEndian>(self.raw())
    }
}

impl BitcoinDeserialize for LockTime {
    fn bitcoin_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(LockTime::from(reader.read_u32::<LittleEndian>()?))
    }
}
