//! # `custodia-std`
//!
//! "std extensions" which other `custodia` crates can use without having to
//! pull in any dependencies. Traits, macros, and small deadline/backoff
//! helpers are all fair game so long as they do NOT depend on anything
//! outside of [`std`].

pub mod backoff;
pub mod const_utils;
pub mod deadline;
