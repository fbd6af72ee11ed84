//! Cache module for storing library responses
//!
//! Responses are kept as rows keyed by the canonical-address hash and the library
//! id. The [`CacheStore`] compresses bodies on the way in and decompresses them on
//! the way out; the [`CacheBackend`] underneath only moves rows around. A file
//! backend and an in-memory backend are provided.

mod backend;
pub mod codec;
mod manager;
mod store;

pub use backend::{CacheBackend, CacheRow, MemoryBackend};
pub use manager::FileBackend;
pub use store::{CacheEntry, CacheStore, NO_CACHE_BODY};

use thiserror::Error;

/// Errors raised by cache backends and the body codec
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem or codec I/O failed
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row could not be decoded
    #[error("cache row is corrupt: {0}")]
    Corrupt(String),
}
