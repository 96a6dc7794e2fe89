// rust/tfbundle-core/src/checkpoint/tensor.rs

//! Tensor values exchanged with model code.

use bytes::Bytes;

use crate::error::{BundleError, Result};
use crate::format::DataType;

/// A dense tensor: element type, dimensions and raw little-endian bytes in
/// row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorData {
    pub dtype: DataType,
    pub shape: Vec<i64>,
    pub bytes: Bytes,
}

impl TensorData {
    pub fn new(dtype: DataType, shape: Vec<i64>, bytes: impl Into<Bytes>) -> Self {
        Self {
            dtype,
            shape,
            bytes: bytes.into(),
        }
    }

    pub fn from_f32(shape: Vec<i64>, values: &[f32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::DtFloat, shape, bytes)
    }

    pub fn from_f64(shape: Vec<i64>, values: &[f64]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::DtDouble, shape, bytes)
    }

    pub fn from_i32(shape: Vec<i64>, values: &[i32]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::DtInt32, shape, bytes)
    }

    pub fn from_i64(shape: Vec<i64>, values: &[i64]) -> Self {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(DataType::DtInt64, shape, bytes)
    }

    /// Product of the dimensions; 1 for a scalar. `None` if any dimension is
    /// negative or the product overflows.
    pub fn element_count(&self) -> Option<u64> {
        element_count(&self.shape)
    }

    /// Byte length implied by dtype and shape.
    pub fn expected_size(&self) -> Option<u64> {
        let width = self.dtype.byte_width()? as u64;
        self.element_count()?.checked_mul(width)
    }

    /// Checks that the byte length matches dtype and shape.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.shape.iter().any(|&d| d < 0) {
            return Err(BundleError::invalid_tensor(
                name,
                format!("negative dimension in shape {:?}", self.shape),
            ));
        }
        if self.dtype.byte_width().is_none() {
            return Err(BundleError::invalid_tensor(
                name,
                format!("dtype {} has no fixed element width", self.dtype.name()),
            ));
        }
        let expected = self.expected_size().ok_or_else(|| {
            BundleError::invalid_tensor(name, format!("shape {:?} is too large", self.shape))
        })?;
        if expected != self.bytes.len() as u64 {
            return Err(BundleError::invalid_tensor(
                name,
                format!(
                    "{} bytes do not match {} x {:?} ({expected} bytes)",
                    self.bytes.len(),
                    self.dtype.name(),
                    self.shape
                ),
            ));
        }
        Ok(())
    }

    pub fn to_f32(&self) -> Result<Vec<f32>> {
        self.decode(DataType::DtFloat, |b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn to_f64(&self) -> Result<Vec<f64>> {
        self.decode(DataType::DtDouble, |b| {
            f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    pub fn to_i32(&self) -> Result<Vec<i32>> {
        self.decode(DataType::DtInt32, |b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn to_i64(&self) -> Result<Vec<i64>> {
        self.decode(DataType::DtInt64, |b| {
            i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    pub fn to_bool(&self) -> Result<Vec<bool>> {
        self.decode(DataType::DtBool, |b| b[0] != 0)
    }

    pub fn to_i8(&self) -> Result<Vec<i8>> {
        self.decode(DataType::DtInt8, |b| i8::from_le_bytes([b[0]]))
    }

    pub fn to_u8(&self) -> Result<Vec<u8>> {
        self.decode(DataType::DtUint8, |b| b[0])
    }

    pub fn to_i16(&self) -> Result<Vec<i16>> {
        self.decode(DataType::DtInt16, |b| i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn to_u16(&self) -> Result<Vec<u16>> {
        self.decode(DataType::DtUint16, |b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn to_u32(&self) -> Result<Vec<u32>> {
        self.decode(DataType::DtUint32, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn to_u64(&self) -> Result<Vec<u64>> {
        self.decode(DataType::DtUint64, |b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    /// Widens bfloat16 elements to f32; bfloat16 is the upper half of an f32.
    pub fn bfloat16_to_f32(&self) -> Result<Vec<f32>> {
        self.decode(DataType::DtBfloat16, |b| {
            f32::from_bits(u32::from(u16::from_le_bytes([b[0], b[1]])) << 16)
        })
    }

    fn decode<T>(&self, expected: DataType, convert: impl Fn(&[u8]) -> T) -> Result<Vec<T>> {
        if self.dtype != expected {
            return Err(BundleError::invalid_tensor(
                "",
                format!("tensor has dtype {}, not {}", self.dtype.name(), expected.name()),
            ));
        }
        // byte_width is Some for every numeric dtype decoded here.
        let width = expected.byte_width().unwrap_or(1);
        if self.bytes.len() % width != 0 {
            return Err(BundleError::invalid_tensor(
                "",
                format!("{} bytes is not a multiple of {width}", self.bytes.len()),
            ));
        }
        Ok(self.bytes.chunks_exact(width).map(convert).collect())
    }
}

/// Product of `shape`, 1 for a scalar.
pub fn element_count(shape: &[i64]) -> Option<u64> {
    shape.iter().try_fold(1u64, |acc, &d| {
        let d = u64::try_from(d).ok()?;
        acc.checked_mul(d)
    })
}
