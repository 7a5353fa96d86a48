//! Top-level facade crate for nocopy.
//!
//! Re-exports the message model and the exchange so users can depend on a single crate.

pub mod core {
    pub use nocopy_core::*;
}

pub mod broker {
    pub use nocopy_broker::*;
}
