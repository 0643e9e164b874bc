//! Fixed-point money and commission rates backed by `rust_decimal`
use super::error::{ReferralError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use std::fmt;
use std::str::FromStr;

/// A non-negative monetary amount. Never constructed from binary floating point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(Decimal);

/// A commission rate in the closed range `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rate(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self> {
        if value < Decimal::ZERO {
            return Err(ReferralError::InvalidAmount(format!(
                "{value} is negative"
            )));
        }
        Ok(Self(value))
    }
    /// Build an amount from integer minor units, `Money::from_minor(10_050, 2)` is 100.50
    pub fn from_minor(units: i64, scale: u32) -> Result<Self> {
        if scale > 28 {
            return Err(ReferralError::InvalidAmount(format!(
                "scale {scale} exceeds 28 decimal places"
            )));
        }
        Self::new(Decimal::new(units, scale))
    }
    pub fn parse(value: &str) -> Result<Self> {
        let decimal = Decimal::from_str(value.trim())
            .map_err(|e| ReferralError::InvalidAmount(format!("{value:?}: {e}")))?;
        Self::new(decimal)
    }
    pub fn value(&self) -> Decimal {
        self.0
    }
    /// Overflow is reported instead of wrapping or panicking
    pub fn checked_add(self, rhs: Money) -> Result<Money> {
        self.0
            .checked_add(rhs.0)
            .map(Money)
            .ok_or_else(|| ReferralError::InvalidAmount(format!("{} + {} overflows", self.0, rhs.0)))
    }
    /// `self × rate`, rounded half away from zero to `precision` decimal places
    pub fn apply_rate(&self, rate: Rate, precision: u32) -> Result<Money> {
        let product = self.0.checked_mul(rate.0).ok_or_else(|| {
            ReferralError::InvalidAmount(format!("{} × {} overflows", self.0, rate.0))
        })?;

        Ok(Money(product.round_dp_with_strategy(
            precision,
            RoundingStrategy::MidpointAwayFromZero,
        )))
    }
}

impl Rate {
    pub fn new(value: Decimal) -> Result<Self> {
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(ReferralError::InvalidConfig(format!(
                "rate {value} must be between 0 and 1"
            )));
        }
        Ok(Self(value))
    }
    pub fn parse(value: &str) -> Result<Self> {
        let decimal = Decimal::from_str(value.trim())
            .map_err(|e| ReferralError::InvalidConfig(format!("rate {value:?}: {e}")))?;
        Self::new(decimal)
    }
    /// `Rate::from_hundredths(5)` is 0.05
    pub(crate) fn from_hundredths(hundredths: u32) -> Self {
        Self(Decimal::from_parts(hundredths, 0, 0, false, 2))
    }
    pub fn value(&self) -> Decimal {
        self.0
    }
    /// The rate as a percentage, 0.10 -> 10
    pub fn percent(&self) -> Decimal {
        (self.0 * Decimal::ONE_HUNDRED).normalize()
    }
}

impl FromStr for Money {
    type Err = ReferralError;

    fn from_str(s: &str) -> Result<Self> {
        Money::parse(s)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// Decimals are stored in their 16 byte wire form so scale survives a round trip.
fn encode_decimal<W: minicbor::encode::Write>(
    value: &Decimal,
    e: &mut minicbor::Encoder<W>,
) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
    e.bytes(&value.serialize())?.ok()
}

fn decode_decimal(d: &mut minicbor::Decoder<'_>) -> std::result::Result<Decimal, minicbor::decode::Error> {
    let raw = d.bytes()?;
    let bytes: [u8; 16] = raw
        .try_into()
        .map_err(|_| minicbor::decode::Error::message("decimal must be exactly 16 bytes"))?;

    Ok(Decimal::deserialize(bytes))
}

impl<C> minicbor::Encode<C> for Money {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        encode_decimal(&self.0, e)
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Money {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> std::result::Result<Self, minicbor::decode::Error> {
        let value = decode_decimal(d)?;
        if value < Decimal::ZERO {
            return Err(minicbor::decode::Error::message("stored amount is negative"));
        }
        Ok(Money(value))
    }
}

impl<C> minicbor::Encode<C> for Rate {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> std::result::Result<(), minicbor::encode::Error<W::Error>> {
        encode_decimal(&self.0, e)
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Rate {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> std::result::Result<Self, minicbor::decode::Error> {
        let value = decode_decimal(d)?;
        if value < Decimal::ZERO || value > Decimal::ONE {
            return Err(minicbor::decode::Error::message("stored rate is outside [0, 1]"));
        }
        Ok(Rate(value))
    }
}
