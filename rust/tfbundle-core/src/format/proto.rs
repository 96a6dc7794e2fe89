// rust/tfbundle-core/src/format/proto.rs

//! Protobuf values stored in the index file.
//!
//! Field numbers mirror TensorFlow's `tensor_bundle.proto`,
//! `tensor_shape.proto`, `tensor_slice.proto`, `versions.proto` and
//! `types.proto`, so the encoded bytes are interchangeable with checkpoints
//! produced by TensorFlow itself.

use prost::Message;

use crate::error::{BundleError, Result};

/// Header stored under the empty key.
#[derive(Clone, PartialEq, Message)]
pub struct BundleHeaderProto {
    /// Number of data shard files.
    #[prost(int32, tag = "1")]
    pub num_shards: i32,
    #[prost(enumeration = "Endianness", tag = "2")]
    pub endianness: i32,
    #[prost(message, optional, tag = "3")]
    pub version: Option<VersionDef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Endianness {
    Little = 0,
    Big = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct VersionDef {
    #[prost(int32, tag = "1")]
    pub producer: i32,
    #[prost(int32, tag = "2")]
    pub min_consumer: i32,
    #[prost(int32, repeated, tag = "3")]
    pub bad_consumers: Vec<i32>,
}

/// Metadata for one named tensor.
#[derive(Clone, PartialEq, Message)]
pub struct BundleEntryProto {
    #[prost(enumeration = "DataType", tag = "1")]
    pub dtype: i32,
    #[prost(message, optional, tag = "2")]
    pub shape: Option<TensorShapeProto>,
    /// Which shard file holds the bytes.
    #[prost(int32, tag = "3")]
    pub shard_id: i32,
    /// Byte offset into the shard.
    #[prost(int64, tag = "4")]
    pub offset: i64,
    /// Byte length in the shard.
    #[prost(int64, tag = "5")]
    pub size: i64,
    /// Masked CRC-32C of the tensor bytes.
    #[prost(fixed32, tag = "6")]
    pub crc32c: u32,
    #[prost(message, repeated, tag = "7")]
    pub slices: Vec<TensorSliceProto>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "2")]
    pub dim: Vec<tensor_shape_proto::Dim>,
    #[prost(bool, tag = "3")]
    pub unknown_rank: bool,
}

pub mod tensor_shape_proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Dim {
        #[prost(int64, tag = "1")]
        pub size: i64,
        #[prost(string, tag = "2")]
        pub name: String,
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct TensorSliceProto {
    #[prost(message, repeated, tag = "1")]
    pub extent: Vec<tensor_slice_proto::Extent>,
}

pub mod tensor_slice_proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Extent {
        #[prost(int64, tag = "1")]
        pub start: i64,
        #[prost(int64, tag = "2")]
        pub length: i64,
    }
}

/// Element types, numbered as in TensorFlow's `DataType` enum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DataType {
    DtInvalid = 0,
    DtFloat = 1,
    DtDouble = 2,
    DtInt32 = 3,
    DtUint8 = 4,
    DtInt16 = 5,
    DtInt8 = 6,
    DtString = 7,
    DtComplex64 = 8,
    DtInt64 = 9,
    DtBool = 10,
    DtQint8 = 11,
    DtQuint8 = 12,
    DtQint32 = 13,
    DtBfloat16 = 14,
    DtQint16 = 15,
    DtQuint16 = 16,
    DtUint16 = 17,
    DtComplex128 = 18,
    DtHalf = 19,
    DtResource = 20,
    DtVariant = 21,
    DtUint32 = 22,
    DtUint64 = 23,
}

impl DataType {
    /// Size of one element in bytes, or `None` for variable-width types.
    pub fn byte_width(self) -> Option<usize> {
        match self {
            DataType::DtBool
            | DataType::DtInt8
            | DataType::DtUint8
            | DataType::DtQint8
            | DataType::DtQuint8 => Some(1),
            DataType::DtInt16
            | DataType::DtUint16
            | DataType::DtQint16
            | DataType::DtQuint16
            | DataType::DtBfloat16
            | DataType::DtHalf => Some(2),
            DataType::DtFloat
            | DataType::DtInt32
            | DataType::DtUint32
            | DataType::DtQint32 => Some(4),
            DataType::DtDouble
            | DataType::DtInt64
            | DataType::DtUint64
            | DataType::DtComplex64 => Some(8),
            DataType::DtComplex128 => Some(16),
            DataType::DtInvalid
            | DataType::DtString
            | DataType::DtResource
            | DataType::DtVariant => None,
        }
    }

    /// Short lowercase name, as printed by TensorFlow tooling.
    pub fn name(self) -> &'static str {
        match self {
            DataType::DtInvalid => "invalid",
            DataType::DtFloat => "float32",
            DataType::DtDouble => "float64",
            DataType::DtInt32 => "int32",
            DataType::DtUint8 => "uint8",
            DataType::DtInt16 => "int16",
            DataType::DtInt8 => "int8",
            DataType::DtString => "string",
            DataType::DtComplex64 => "complex64",
            DataType::DtInt64 => "int64",
            DataType::DtBool => "bool",
            DataType::DtQint8 => "qint8",
            DataType::DtQuint8 => "quint8",
            DataType::DtQint32 => "qint32",
            DataType::DtBfloat16 => "bfloat16",
            DataType::DtQint16 => "qint16",
            DataType::DtQuint16 => "quint16",
            DataType::DtUint16 => "uint16",
            DataType::DtComplex128 => "complex128",
            DataType::DtHalf => "float16",
            DataType::DtResource => "resource",
            DataType::DtVariant => "variant",
            DataType::DtUint32 => "uint32",
            DataType::DtUint64 => "uint64",
        }
    }
}

impl BundleHeaderProto {
    /// Header for a checkpoint written by this crate.
    pub fn single_writer(num_shards: i32) -> Self {
        Self {
            num_shards,
            endianness: Endianness::Little as i32,
            version: Some(VersionDef {
                producer: 1,
                ..Default::default()
            }),
        }
    }

    pub fn decode_value(bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes)
            .map_err(|e| BundleError::corrupt_entry_with_source("", "failed to parse bundle header", e))
    }
}

impl BundleEntryProto {
    pub fn decode_value(key: &str, bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes)
            .map_err(|e| BundleError::corrupt_entry_with_source(key, "failed to parse bundle entry", e))
    }

    /// Dimension sizes, empty for scalars.
    pub fn shape_dims(&self) -> Vec<i64> {
        self.shape
            .as_ref()
            .map(|shape| shape.dim.iter().map(|d| d.size).collect())
            .unwrap_or_default()
    }
}

impl TensorShapeProto {
    pub fn from_dims(dims: &[i64]) -> Self {
        Self {
            dim: dims
                .iter()
                .map(|&size| tensor_shape_proto::Dim {
                    size,
                    name: String::new(),
                })
                .collect(),
            unknown_rank: false,
        }
    }
}
