//! # Billing platform server
//!
//! The HTTP surface of the billing platform. It is responsible for:
//! Accepting checkout, payment-form and refund requests from merchant integrations.
//! Receiving payment-system callbacks on the raw-body routes and handing them to the engine
//! with the claimed signature.
//! Wiring the engine APIs to the SQLite store and the remote catalog, gateway and side-effect
//! services.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more
//! information.
//!
//! ## Routes
//! All business responses use the engine's status/message envelope; transport errors map to
//! HTTP status codes through [`errors::ServerError`].

pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod remote;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
