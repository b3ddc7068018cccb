//! Structured-concurrency helpers shared by `custodia-node`'s server and
//! worker tasks: a `JoinHandle` wrapper that propagates panics and logs on
//! exit ([`task`]), a dedup notification channel ([`notify`]), and a
//! multi-consumer at-most-once shutdown signal ([`notify_once`]).

/// A channel for sending deduplicated notifications with no data attached.
pub mod notify;
/// `NotifyOnce`, typically used as a shutdown channel.
pub mod notify_once;
/// `LxTask` and associated helpers.
pub mod task;

// Can save a `tokio` dependency declaration
pub use tokio;
