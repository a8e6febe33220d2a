//! Shared value types for the billing platform.
//!
//! This crate carries the types every other crate agrees on: the [`Money`] fixed-point amount with
//! the platform's canonical rounding rules, and the [`Secret`] wrapper for values that must never
//! appear in logs.
mod money;
pub mod op;
mod secret;

pub use money::{Money, MoneyParseError, PRECISE_DECIMALS};
pub use secret::Secret;
