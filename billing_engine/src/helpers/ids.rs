//! Identifier generation for orders, refunds and accounting entries.

use rand::Rng;

/// A random 24-byte identifier rendered as 48 lowercase hex characters.
pub fn new_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 24] = rng.gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
