//! Coin amounts, denominated in satoshis.
//!
//! `Amount` is a constrained signed 64-bit satoshi count. Arithmetic never
//! saturates or wraps: any operation that would leave the constraint's range
//! returns an error, because a silently wrong amount is a consensus fault.

use std::marker::PhantomData;

use crate::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::convert::TryFrom;

/// One bitcoin, in satoshis.
pub const COIN: i64 = 100_000_000;

/// One hundredth of a bitcoin; the threshold below which an output makes a
/// transaction "small" for fee purposes.
pub const CENT: i64 = COIN / 100;

/// The total issuance cap, in satoshis.
pub const MAX_MONEY: i64 = 21_000_000 * COIN;

/// A runtime validated satoshi amount.
///
/// The constraint type parameter fixes the range a value may occupy; wire
/// outputs use [`NonNegative`], fee and balance arithmetic uses
/// [`NegativeAllowed`].
#[derive(Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64", bound = "C: Constraint")]
pub struct Amount<C = NegativeAllowed>(i64, PhantomData<C>);

impl<C> Clone for Amount<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Amount<C> {}

impl<C> std::fmt::Debug for Amount<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple(&format!("Amount<{}>", std::any::type_name::<C>()))
            .field(&self.0)
            .finish()
    }
}

impl<C> std::fmt::Display for Amount<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(
            f,
            "{}{}.{:08} BTC",
            sign,
            magnitude / COIN as u64,
            magnitude % COIN as u64
        )
    }
}

impl<C> Amount<C> {
    /// The zero amount.
    pub fn zero() -> Amount<C> {
        Amount(0, PhantomData)
    }

    /// The raw satoshi count.
    pub fn as_sat(&self) -> i64 {
        self.0
    }

    /// Drop the constraint, for signed arithmetic.
    pub fn constrain<C2>(self) -> Result<Amount<C2>, Error>
    where
        C2: Constraint,
    {
        Amount::<C2>::try_from(self.0)
    }

    /// Checked addition within this amount's constraint.
    pub fn checked_add(self, rhs: Amount<C>) -> Result<Amount<C>, Error>
    where
        C: Constraint,
    {
        let value = self
            .0
            .checked_add(rhs.0)
            .ok_or(Error::Overflow)?;
        Amount::try_from(value)
    }

    /// Checked subtraction within this amount's constraint.
    pub fn checked_sub(self, rhs: Amount<C>) -> Result<Amount<C>, Error>
    where
        C: Constraint,
    {
        let value = self
            .0
            .checked_sub(rhs.0)
            .ok_or(Error::Overflow)?;
        Amount::try_from(value)
    }
}

impl<C> PartialEq for Amount<C> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<C> Eq for Amount<C> {}

impl<C> PartialOrd for Amount<C> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.0.cmp(&other.0))
    }
}

impl<C> Ord for Amount<C> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl<C> std::hash::Hash for Amount<C> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl<C> From<Amount<C>> for i64 {
    fn from(amount: Amount<C>) -> i64 {
        amount.0
    }
}

impl<C> TryFrom<i64> for Amount<C>
where
    C: Constraint,
{
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if !C::valid_range().contains(&value) {
            return Err(Error::OutOfRange { value });
        }
        Ok(Amount(value, PhantomData))
    }
}

impl<C> TryFrom<u64> for Amount<C>
where
    C: Constraint,
{
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let signed = i64::try_from(value).map_err(|_| Error::Overflow)?;
        Amount::try_from(signed)
    }
}

/// Errors arising from amount construction or arithmetic.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The result left the constraint's valid range.
    #[error("amount {value} is outside the valid range")]
    OutOfRange {
        /// The offending satoshi count.
        value: i64,
    },
    /// The i64 computation itself overflowed.
    #[error("amount arithmetic overflowed")]
    Overflow,
}

/// The range of values a constrained amount may hold.
pub trait Constraint {
    /// The inclusive range of valid satoshi counts.
    fn valid_range() -> std::ops::RangeInclusive<i64>;
}

/// Allows any amount in `-MAX_MONEY..=MAX_MONEY`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NegativeAllowed;

impl Constraint for NegativeAllowed {
    fn valid_range() -> std::ops::RangeInclusive<i64> {
        -MAX_MONEY..=MAX_MONEY
    }
}

/// Allows amounts in `0..=MAX_MONEY`; the constraint on wire outputs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NonNegative;

impl Constraint for NonNegative {
    fn valid_range() -> std::ops::RangeInclusive<i64> {
        0..=MAX_MONEY
    }
}

/// Sum an iterator of amounts, failing on the first overflow.
pub fn sum<C, I>(amounts: I) -> Result<Amount<C>, Error>
where
    C: Constraint,
    I: IntoIterator<Item = Amount<C>>,
{
    amounts
        .into_iter()
        .try_fold(Amount::zero(), |acc, amount| acc.checked_add(amount))
}

impl<C> BitcoinSerialize for Amount<C> {
    fn bitcoin_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i64::<LittleEndian>(self.0)
    }
}

impl<C: Constraint> BitcoinDeserialize for Amount<C> {
    fn bitcoin_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let value = reader.read_i64::<LittleEndian>()?;
        Amount::try_from(value).map_err(|_| SerializationError::Parse("amount out of range"))
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl<C: Constraint + std::fmt::Debug> proptest::arbitrary::Arbitrary for Amount<C> {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        C::valid_range()
            .prop_map(|value| Amount::try_from(value).expect("value from valid range"))
            .boxed()
    }

    type Strategy = proptest::strategy::BoxedStrategy<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constrained_construction() {
        assert!(Amount::<NonNegative>::try_from(0i64).is_ok());
        assert!(Amount::<NonNegative>::try_from(MAX_MONEY).is_ok());
        assert!(Amount::<NonNegative>::try_from(-1i64).is_err());
        assert!(Amount::<NonNegative>::try_from(MAX_MONEY + 1).is_err());
        assert!(Amount::<NegativeAllowed>::try_from(-MAX_MONEY).is_ok());
    }

    #[test]
    fn arithmetic_is_checked() {
        let one = Amount::<NonNegative>::try_from(1i64).unwrap();
        let max = Amount::<NonNegative>::try_from(MAX_MONEY).unwrap();
        assert_eq!(max.checked_add(one), Err(Error::OutOfRange { value: MAX_MONEY + 1 }));
        assert_eq!(
            Amount::<NonNegative>::zero().checked_sub(one),
            Err(Error::OutOfRange { value: -1 })
        );
    }

    #[test]
    fn display_renders_btc() {
        let amount = Amount::<NonNegative>::try_from(150_000_000i64).unwrap();
        assert_eq!(amount.to_string(), "1.50000000 BTC");
        let amount = Amount::<NegativeAllowed>::try_from(-546i64).unwrap();
        assert_eq!(amount.to_string(), "-0.00000546 BTC");
    }

    #[test]
    fn sum_overflow_detected() {
        let max = Amount::<NonNegative>::try_from(MAX_MONEY).unwrap();
        assert!(sum(vec![max, max]).is_err());
    }
}
