//! # Request signature format
//!
//! Merchant API calls and gateway callbacks are authenticated with a shared-secret digest rather
//! than a session. The signature is the lowercase hexadecimal SHA-512 of the raw request body with
//! the secret appended:
//!
//! ```text
//!    signature = hex(sha512(body || secret))
//! ```
//!
//! The digest is computed over the body bytes exactly as received. Re-serialising the parsed JSON
//! would break signatures from clients whose serialisers order fields differently, so callers must
//! hand this module the untouched payload.
//!
//! Order-create requests sign with the project's API secret; gateway callbacks sign with the
//! project's callback secret. Which secret applies is the caller's concern.

use sha2::{Digest, Sha512};

use crate::errors::BillingError;

/// The lowercase hex SHA-512 digest of `body` with `secret` appended.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(body);
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Checks a claimed signature against the raw request body. Comparison is case-insensitive on the
/// hex digits since some gateways uppercase their digests.
pub fn verify(body: &[u8], secret: &str, claimed: &str) -> Result<(), BillingError> {
    let expected = sign(body, secret);
    if claimed.len() == expected.len() && claimed.eq_ignore_ascii_case(&expected) {
        Ok(())
    } else {
        Err(BillingError::SignatureInvalid)
    }
}
