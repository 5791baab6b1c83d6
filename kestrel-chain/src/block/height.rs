use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The height of a block in its chain: the number of ancestors between it
/// and the genesis block, which sits at height zero.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Height(pub u32);

impl Height {
    /// The genesis height.
    pub const MIN: Height = Height(0);

    /// The largest height consensus allows.
    ///
    /// Heights at or above this value collide with the lock-time timestamp
    /// threshold.
    pub const MAX: Height = Height(499_999_999);

    /// The height one block above this one.
    pub fn next(self) -> Option<Height> {
        let next = self.0.checked_add(1)?;
        if next <= Height::MAX.0 {
            Some(Height(next))
        } else {
            None
        }
    }
}

impl BitcoinSerialize for Height {
    fn bitcoin_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error> {
        self.0.bitcoin_serialize(target)
    }
}

impl BitcoinDeserialize for Height {
    fn bitcoin_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Height(u32::bitcoin_deserialize(reader)?))
    }
}
