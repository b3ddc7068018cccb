//! # `custodia-api-core`
//!
//! Wire types, the error taxonomy, and the backend-contract traits (ledger,
//! KMS) shared between the settlement engine and its HTTP/worker surfaces.
//! Kept dependency-light so it can be used from both the engine's internals
//! and thin client code.

#[cfg(feature = "axum")]
pub mod axum_helpers;
pub mod def;
pub mod error;
pub mod models;
