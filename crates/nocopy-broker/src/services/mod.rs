//! Built-in services.

pub mod echo;

pub use echo::{drive, Echo, EchoProbe, EchoReport, EchoService, ECHO};
