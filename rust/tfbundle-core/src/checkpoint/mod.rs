// rust/tfbundle-core/src/checkpoint/mod.rs

//! Reading and writing TensorFlow v2 checkpoints.
//!
//! A checkpoint with base path `dir/model` consists of:
//!
//! ```text
//! dir/model.index                    <- sorted table: header + one entry per tensor
//! dir/model.data-00000-of-00001      <- raw little-endian tensor bytes
//! ```
//!
//! The index is a LevelDB-style table:
//!
//! ```text
//! +------------------------+
//! | Data block             |  <- "" -> BundleHeaderProto, then name -> BundleEntryProto
//! | Block trailer (5 bytes)|  <- type byte + masked crc32c
//! +------------------------+
//! | Meta-index block       |  <- empty
//! | Block trailer (5 bytes)|
//! +------------------------+
//! | Index block            |  <- one entry: successor(last key) -> data block handle
//! | Block trailer (5 bytes)|
//! +------------------------+
//! | Footer (48 bytes)      |  <- two block handles, padding, magic
//! +------------------------+
//! ```
//!
//! Each entry records the shard, offset, size and crc32c of one tensor's
//! bytes inside its data shard.
//!
//! Checkpoints may also be distributed as `.tar.gz`, `.tgz`, `.tar` or
//! `.zip` archives; [`CheckpointReader::load`] unpacks them into the fetch
//! cache.
//!
//! # Example
//!
//! ```no_run
//! use tfbundle_core::checkpoint::{CheckpointReader, CheckpointWriter, TensorData};
//! use tfbundle_core::config::BundleConfig;
//! use std::path::Path;
//!
//! # fn example() -> tfbundle_core::Result<()> {
//! let config = BundleConfig::default();
//! let writer = CheckpointWriter::local(&config)?;
//! let tensors = vec![(
//!     "dense/kernel".to_string(),
//!     TensorData::from_f32(vec![2], &[0.5, -0.5]),
//! )];
//! let base = writer.write(tensors, Path::new("out"), "model")?;
//!
//! let mut reader = CheckpointReader::open_local(&base, &config)?;
//! let kernel = reader.load_tensor("dense/kernel")?;
//! assert_eq!(kernel.to_f32()?, vec![0.5, -0.5]);
//! # Ok(())
//! # }
//! ```

mod archive;
mod index_reader;
mod index_writer;
mod reader;
mod tensor;
mod writer;

#[cfg(feature = "remote")]
mod fetch;

pub use archive::{extract_archive, extract_checkpoint_archive, find_checkpoint_base, is_archive, ArchiveKind};
pub use index_reader::IndexReader;
pub use index_writer::IndexWriter;
pub use reader::{index_file_name, shard_file_name, CheckpointLocation, CheckpointReader};
pub use tensor::{element_count, TensorData};
pub use writer::CheckpointWriter;

#[cfg(feature = "remote")]
pub use fetch::CheckpointFetcher;
