// rust/tfbundle-core/src/format/mod.rs

//! Low-level building blocks of the `.index` file format: varints,
//! masked CRC-32C, Snappy decoding, protobuf values and the sorted string
//! table framing.

pub mod crc;
pub mod proto;
pub mod snappy;
pub mod table;
pub mod varint;

pub use crc::{crc32c, mask, masked_crc32c, unmask};
pub use proto::{
    BundleEntryProto, BundleHeaderProto, DataType, Endianness, TensorShapeProto,
    TensorSliceProto, VersionDef,
};
pub use snappy::{decompress_snappy, decompress_snappy_prefix};
pub use table::{BlockBuilder, BlockHandle, Footer, FOOTER_SIZE, TABLE_MAGIC};
pub use varint::{read_varint, varint_bytes, write_varint};
