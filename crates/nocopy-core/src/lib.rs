//! nocopy core: transport-agnostic message model, wire frame codec, and errors.
//!
//! This crate defines the envelope, the immutable message decorator chain, the
//! middleware contracts and the length-counted JSON frame shared by every
//! nocopy service. It carries no async runtime so the same model can be used
//! by the exchange, by tooling, and by tests.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Malformed frames surface as `Error`/`Result` and never bring a service down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod message;

/// Shared result type.
pub use error::{Error, ErrorKind, Result};
