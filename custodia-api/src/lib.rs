//! # `custodia-api`
//!
//! REST client plumbing, HTTP-signature authentication, and axum server
//! building blocks shared by the operator-facing HTTP surface and the
//! custodian drivers' outbound HTTP calls.

pub mod rest;
pub mod server;
pub mod sig_auth;
