//! Tensor buffers for inference
//!
//! Weights live either as full-precision floats or as native half-precision
//! values that are widened element by element at compute time.

mod dtype;
pub mod ops;
pub mod view;

pub use dtype::DType;
pub use view::TensorView;

use crate::{Error, Result};
use half::f16;
use std::sync::Arc;

/// A one-dimensional weight buffer with shared ownership
#[derive(Debug, Clone)]
pub enum Tensor {
    /// Full-precision storage
    F32(Arc<[f32]>),
    /// Half-precision storage (dequantized on read)
    F16(Arc<[f16]>),
}

impl Tensor {
    /// Create a full-precision tensor
    pub fn from_f32(data: Vec<f32>) -> Self {
        Tensor::F32(data.into())
    }

    /// Create a half-precision tensor
    pub fn from_f16(data: Vec<f16>) -> Self {
        Tensor::F16(data.into())
    }

    /// Storage type
    pub fn dtype(&self) -> DType {
        match self {
            Tensor::F32(_) => DType::F32,
            Tensor::F16(_) => DType::F16,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            Tensor::F32(data) => data.len(),
            Tensor::F16(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held in memory
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Tensor::F32(data) => data.len() * 4,
            Tensor::F16(data) => data.len() * 2,
        }
    }

    /// Element `i` as f32
    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        match self {
            Tensor::F32(data) => data[i],
            Tensor::F16(data) => data[i].to_f32(),
        }
    }

    /// Borrow full-precision data without conversion
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Tensor::F32(data) => Some(data),
            Tensor::F16(_) => None,
        }
    }

    /// Convert to f32 vec
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Tensor::F32(data) => data.to_vec(),
            Tensor::F16(data) => data.iter().map(|v| v.to_f32()).collect(),
        }
    }

    /// Copy row `row` of a `[rows, out.len()]` matrix into `out`
    pub fn copy_row(&self, row: usize, out: &mut [f32]) -> Result<()> {
        let width = out.len();
        let start = row * width;
        let end = start + width;
        if end > self.len() {
            return Err(Error::ShapeMismatch {
                expected: vec![end],
                got: vec![self.len()],
            });
        }

        match self {
            Tensor::F32(data) => out.copy_from_slice(&data[start..end]),
            Tensor::F16(data) => {
                for (dst, src) in out.iter_mut().zip(&data[start..end]) {
                    *dst = src.to_f32();
                }
            }
        }
        Ok(())
    }

    /// Do both handles point at the same buffer?
    pub fn ptr_eq(&self, other: &Tensor) -> bool {
        match (self, other) {
            (Tensor::F32(a), Tensor::F32(b)) => Arc::ptr_eq(a, b),
            (Tensor::F16(a), Tensor::F16(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Check element count against an expected shape
    pub(crate) fn expect_len(&self, expected: usize) -> Result<()> {
        if self.len() != expected {
            return Err(Error::ShapeMismatch {
                expected: vec![expected],
                got: vec![self.len()],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_from_f32() {
        let data = vec![1.0, 2.0, 3.0, 4.0];
        let tensor = Tensor::from_f32(data.clone());
        assert_eq!(tensor.len(), 4);
        assert_eq!(tensor.dtype(), DType::F32);
        assert_eq!(tensor.to_f32_vec(), data);
    }

    #[test]
    fn test_f16_dequantizes_on_read() {
        let tensor = Tensor::from_f16(vec![f16::from_f32(1.5), f16::from_f32(-2.0)]);
        assert_eq!(tensor.get(0), 1.5);
        assert_eq!(tensor.get(1), -2.0);
        assert_eq!(tensor.size_in_bytes(), 4);
        assert!(tensor.as_f32().is_none());
    }

    #[test]
    fn test_copy_row() {
        let tensor = Tensor::from_f32(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut row = vec![0.0; 3];
        tensor.copy_row(1, &mut row).unwrap();
        assert_eq!(row, vec![4.0, 5.0, 6.0]);
        assert!(tensor.copy_row(2, &mut row).is_err());
    }

    #[test]
    fn test_ptr_eq() {
        let a = Tensor::from_f32(vec![1.0]);
        let b = a.clone();
        let c = Tensor::from_f32(vec![1.0]);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
    }
}
