//! nocopy broker library entry.
//!
//! This crate wires the exchange (registries, correlation, task tracking),
//! the transport seam and its in-process bus, the shipped middlewares, the
//! config loader and the built-in echo service into one stack. It is
//! consumed by the demo binary (`main.rs`) and by integration tests.

pub mod collab;
pub mod config;
pub mod exchange;
pub mod middleware;
pub mod services;
pub mod transport;

pub use exchange::{Exchange, Key, Opt, Topic};
pub use transport::{Bus, Logged, MemoryTransport, Transport};
