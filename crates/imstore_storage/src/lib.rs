//! # imstore Storage
//!
//! Byte-store backends for imstore block files.
//!
//! Every block of the message log (`message_<N>`) is one backend. Backends
//! are **opaque byte stores**: they know nothing about record framing, magic
//! numbers or message ids. The block store in `imstore_core` owns all of that.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - A block file on disk, writable or read-only
//! - [`InMemoryBackend`] - For tests and tooling that build blocks in memory
//!
//! ## Example
//!
//! ```rust
//! use imstore_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut block = InMemoryBackend::new();
//! let offset = block.append(b"IMIM").unwrap();
//! assert_eq!(block.read_at(offset, 4).unwrap(), b"IMIM");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
