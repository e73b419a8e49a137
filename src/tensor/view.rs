//! Zero-copy tensor views over memory-mapped GGUF data

use super::{DType, Tensor};
use crate::{Error, Result};
use half::f16;

/// A view into the raw bytes of one tensor (zero-copy)
pub struct TensorView<'a> {
    /// Tensor name, for error messages
    name: &'a str,
    /// Bytes inside the memory map
    data: &'a [u8],
    /// Storage type
    dtype: DType,
    /// Number of elements
    numel: usize,
}

impl<'a> TensorView<'a> {
    /// Create a view from raw bytes
    pub fn new(name: &'a str, data: &'a [u8], dtype: DType, numel: usize) -> Result<Self> {
        let expected = dtype.byte_size(numel as u64) as usize;
        if data.len() != expected {
            return Err(Error::format(format!(
                "tensor {} has {} bytes, expected {}",
                name,
                data.len(),
                expected
            )));
        }
        Ok(Self {
            name,
            data,
            dtype,
            numel,
        })
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.data
    }

    /// Get dtype
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        self.numel
    }

    /// Decode into a full-precision tensor (copies data)
    pub fn to_f32_tensor(&self) -> Result<Tensor> {
        let values = match self.dtype {
            DType::F32 => decode_f32(self.data),
            DType::F16 => decode_f16(self.data).iter().map(|v| v.to_f32()).collect(),
            other => return Err(self.unsupported(other)),
        };
        Ok(Tensor::from_f32(values))
    }

    /// Decode into a native half-precision tensor (copies data)
    pub fn to_f16_tensor(&self) -> Result<Tensor> {
        match self.dtype {
            DType::F16 => Ok(Tensor::from_f16(decode_f16(self.data))),
            other => Err(self.unsupported(other)),
        }
    }

    fn unsupported(&self, dtype: DType) -> Error {
        Error::UnsupportedDType {
            tensor: self.name.to_string(),
            dtype: dtype.to_string(),
        }
    }
}

// GGUF stores little-endian values; the mapped slice carries no alignment
// guarantee, so collect into a freshly allocated buffer.
#[cfg(target_endian = "little")]
fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytemuck::pod_collect_to_vec::<u8, f32>(bytes)
}

#[cfg(target_endian = "little")]
fn decode_f16(bytes: &[u8]) -> Vec<f16> {
    bytemuck::pod_collect_to_vec::<u8, f16>(bytes)
}

#[cfg(target_endian = "big")]
fn decode_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(target_endian = "big")]
fn decode_f16(bytes: &[u8]) -> Vec<f16> {
    bytes
        .chunks_exact(2)
        .map(|b| f16::from_le_bytes([b[0], b[1]]))
        .collect()
}
