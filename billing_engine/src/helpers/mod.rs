//! Small utilities shared across the engine: request signatures, card requisite handling and
//! identifier generation.

pub mod card;
pub mod ids;
pub mod signature;
