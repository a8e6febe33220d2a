//! Card requisite handling.
//!
//! The engine never stores a full PAN. Card numbers that arrive on the payment-create call are
//! reduced to a masked form, a BIN prefix for routing lookups, and a one-way fingerprint used to
//! recognise a returning card for recurring billing.

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::BillingError;

const MASK_CHAR: char = '*';

/// Checks a payment account against the method's account pattern. An empty pattern accepts any
/// non-empty account.
pub fn validate_account(account: &str, pattern: &str) -> Result<(), BillingError> {
    if account.is_empty() {
        return Err(BillingError::PaymentAccountIncorrect);
    }
    if pattern.is_empty() {
        return Ok(());
    }
    let re = Regex::new(pattern).map_err(|_| BillingError::PaymentAccountIncorrect)?;
    if re.is_match(account) {
        Ok(())
    } else {
        Err(BillingError::PaymentAccountIncorrect)
    }
}

/// Masks a PAN down to its first six and last four digits. Shorter inputs are masked entirely.
/// Anything but ASCII digits is not a PAN and is rejected; method account patterns are merchant
/// configuration and cannot be trusted to have filtered the input.
pub fn mask_pan(pan: &str) -> Result<String, BillingError> {
    if pan.is_empty() || !pan.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BillingError::PaymentAccountIncorrect);
    }
    if pan.len() <= 10 {
        return Ok(MASK_CHAR.to_string().repeat(pan.len()));
    }
    let head = &pan[..6];
    let tail = &pan[pan.len() - 4..];
    let body = MASK_CHAR.to_string().repeat(pan.len() - 10);
    Ok(format!("{head}{body}{tail}"))
}

/// The issuer identification prefix of a PAN, used for BIN-table lookups.
pub fn bin(pan: &str) -> Option<&str> {
    if pan.len() >= 6 && pan.as_bytes()[..6].iter().all(u8::is_ascii_digit) {
        Some(&pan[..6])
    } else {
        None
    }
}

/// A salted one-way fingerprint of a PAN. Two payments with the same card and salt produce the
/// same fingerprint, letting the vault recognise a stored card without keeping the number.
pub fn fingerprint(pan: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pan.as_bytes());
    format!("{:x}", hasher.finalize())
}
