//! Support for engine and integration tests: reference-data fixtures and in-memory collaborator
//! fakes.

pub mod fixtures;
pub mod memory;
