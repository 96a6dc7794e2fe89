// rust/tfbundle-core/src/storage/mod.rs

//! Storage abstraction for checkpoint files.
//!
//! The checkpoint reader and writer perform all file I/O through
//! [`StorageBackend`], so tests and callers can point them at any directory
//! without touching global state.
//!
//! # Example
//!
//! ```no_run
//! use tfbundle_core::config::StorageConfig;
//! use tfbundle_core::storage::{LocalStorage, StorageBackend};
//! use std::io::Write;
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&StorageConfig::default()).unwrap();
//!
//! let mut writer = storage.open_write(Path::new("example.bin")).unwrap();
//! writer.write_all(b"tensor bytes").unwrap();
//! writer.finish().unwrap();
//!
//! let mut reader = storage.open_read(Path::new("example.bin")).unwrap();
//! let bytes = reader.read_range(0, 6).unwrap();
//! assert_eq!(bytes, b"tensor");
//! ```

mod local;
mod retry;
mod traits;

pub use local::LocalStorage;
pub use retry::{retry_async, RetryConfig, RetryResult};
pub use traits::{StorageBackend, StorageReader, StorageWriter};
