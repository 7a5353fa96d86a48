//! Frame middlewares shipped with the broker.
//!
//! - `authorize`: carries the calling user through the exchange chain.
//! - `signature`: digests the whole frame and verifies it on receipt.

pub mod authorize;
pub mod signature;

pub use authorize::Authorize;
pub use signature::{Algorithm, Signature};

use nocopy_core::{Error, Result};

/// Segment `frame[begin..begin + len]`, refusing ranges outside the frame.
pub(crate) fn segment(frame: &[u8], begin: usize, len: usize) -> Result<&[u8]> {
    begin
        .checked_add(len)
        .and_then(|end| frame.get(begin..end))
        .ok_or_else(|| Error::BadFrame("segment outside of frame".into()))
}
