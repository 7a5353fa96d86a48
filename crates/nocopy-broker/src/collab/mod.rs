//! Collaborators behind the exchange: object storage and the block repository.
//!
//! Services reach them only through these traits; the in-memory
//! implementations back the tests.

pub mod repository;
pub mod storage;

pub use repository::{Block, FileInfo, MemoryRepository, Repository};
pub use storage::{MemoryStorage, Storage};

use nocopy_core::message::Fault;
use nocopy_core::Error;

pub(crate) fn not_found(what: &str) -> Error {
    Error::Failure(Fault::new(404, format!("{what} not found")))
}
