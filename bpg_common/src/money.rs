use std::{
    fmt::{Display, Formatter},
    iter::Sum,
    ops::{Div, Mul},
    str::FromStr,
};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::op;

/// Number of decimal places carried by intermediate accounting arithmetic.
///
/// Every conversion and fee formula rounds to this precision after each step so that the
/// money-conservation identities hold bit-for-bit no matter how a total is decomposed.
pub const PRECISE_DECIMALS: u32 = 10;

/// ISO-4217 currencies whose minor unit is the whole unit.
const ZERO_DECIMAL_CURRENCIES: [&str; 16] = [
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND", "VUV", "XAF", "XOF", "XPF",
];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Could not parse '{0}' as a monetary amount")]
pub struct MoneyParseError(String);

/// A monetary amount.
///
/// `Money` is a thin wrapper over a fixed-point decimal. All platform arithmetic goes through this
/// type so that the rounding rules live in exactly one place:
/// * [`Money::to_precise`] rounds to [`PRECISE_DECIMALS`] places, half away from zero. Applied
///   after every intermediate accounting step.
/// * [`Money::round_currency`] rounds to the display precision of a currency (2 places for most
///   currencies, 0 for the zero-decimal set). Applied to customer-facing amounts.
///
/// In the database, amounts are stored as their canonical decimal string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, AddAssign, add_assign);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Money {
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// The raw decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Rounds to [`PRECISE_DECIMALS`] decimal places, half away from zero.
    pub fn to_precise(self) -> Self {
        Self(self.0.round_dp_with_strategy(PRECISE_DECIMALS, RoundingStrategy::MidpointAwayFromZero))
    }

    /// Rounds to the display precision of `currency`, half away from zero.
    pub fn round_currency(self, currency: &str) -> Self {
        Self(self.0.round_dp_with_strategy(Self::decimals_for(currency), RoundingStrategy::MidpointAwayFromZero))
    }

    /// Display precision for an ISO currency code. 2 unless the currency has no minor unit.
    pub fn decimals_for(currency: &str) -> u32 {
        if ZERO_DECIMAL_CURRENCIES.contains(&currency) {
            0
        } else {
            2
        }
    }

    /// The fraction this amount represents of `whole`, or `None` when `whole` is zero.
    pub fn checked_ratio(self, whole: Self) -> Option<Decimal> {
        if whole.0.is_zero() {
            None
        } else {
            Some(self.0 / whole.0)
        }
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Money {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, v| acc + v)
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s).map(Self).map_err(|_| MoneyParseError(s.to_string()))
    }
}

//--------------------------------     Database bridging     ---------------------------------

impl<DB: sqlx::Database> sqlx::Type<DB> for Money
where String: sqlx::Type<DB>
{
    fn type_info() -> DB::TypeInfo {
        <String as sqlx::Type<DB>>::type_info()
    }

    fn compatible(ty: &DB::TypeInfo) -> bool {
        <String as sqlx::Type<DB>>::compatible(ty)
    }
}

impl<'q, DB: sqlx::Database> sqlx::Encode<'q, DB> for Money
where String: sqlx::Encode<'q, DB>
{
    fn encode_by_ref(
        &self,
        buf: &mut <DB as sqlx::database::HasArguments<'q>>::ArgumentBuffer,
    ) -> sqlx::encode::IsNull {
        <String as sqlx::Encode<'q, DB>>::encode(self.0.to_string(), buf)
    }
}

impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for Money
where &'r str: sqlx::Decode<'r, DB>
{
    fn decode(
        value: <DB as sqlx::database::HasValueRef<'r>>::ValueRef,
    ) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<'r, DB>>::decode(value)?;
        let money = raw.parse::<Money>()?;
        Ok(money)
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parse_and_display() {
        let m = "120.50".parse::<Money>().unwrap();
        assert_eq!(m, Money::new(dec!(120.50)));
        assert_eq!(m.to_string(), "120.50");
        assert!("12,5".parse::<Money>().is_err());
    }

    #[test]
    fn precise_rounding_is_half_away_from_zero() {
        let m = Money::new(dec!(3.6)) / dec!(65);
        assert_eq!(m.to_precise(), Money::new(dec!(0.0553846154)));
        let n = Money::new(dec!(-0.00000000015));
        assert_eq!(n.to_precise(), Money::new(dec!(-0.0000000002)));
    }

    #[test]
    fn currency_rounding() {
        let m = Money::new(dec!(10.345));
        assert_eq!(m.round_currency("USD"), Money::new(dec!(10.35)));
        assert_eq!(m.round_currency("JPY"), Money::new(dec!(10)));
        assert_eq!(Money::decimals_for("RUB"), 2);
        assert_eq!(Money::decimals_for("KRW"), 0);
    }

    #[test]
    fn arithmetic() {
        let a = Money::new(dec!(10.00));
        let b = Money::new(dec!(2.50));
        assert_eq!(a + b, Money::new(dec!(12.50)));
        assert_eq!(a - b, Money::new(dec!(7.50)));
        assert_eq!(-b, Money::new(dec!(-2.50)));
        assert_eq!(a * dec!(0.03), Money::new(dec!(0.3000)));
        let mut c = a;
        c += b;
        c -= Money::new(dec!(0.50));
        assert_eq!(c, Money::new(dec!(12.00)));
        assert_eq!([a, b, b].into_iter().sum::<Money>(), Money::new(dec!(15.00)));
    }

    #[test]
    fn ratios() {
        let part = Money::new(dec!(30));
        let whole = Money::new(dec!(120));
        assert_eq!(part.checked_ratio(whole), Some(dec!(0.25)));
        assert_eq!(part.checked_ratio(Money::zero()), None);
    }

    #[test]
    fn serde_round_trip() {
        let m = Money::new(dec!(90.328));
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"90.328\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
        let from_number: Money = serde_json::from_str("650").unwrap();
        assert_eq!(from_number, Money::new(dec!(650)));
    }
}
