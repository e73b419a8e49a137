//! In-memory GGUF writer for building test fixtures

use super::{MetadataValue, ValueType, ALIGNMENT_KEY, DEFAULT_ALIGNMENT, GGUF_MAGIC};
use crate::tensor::DType;
use half::f16;
use std::io::Write;
use tempfile::NamedTempFile;

struct FixtureTensor {
    name: String,
    shape: Vec<u64>,
    ggml_type: u32,
    data: Vec<u8>,
}

/// Builds a version 3 GGUF image
#[derive(Default)]
pub(crate) struct GgufBuilder {
    kvs: Vec<(String, MetadataValue)>,
    tensors: Vec<FixtureTensor>,
}

impl GgufBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn value(mut self, key: &str, value: MetadataValue) -> Self {
        self.kvs.push((key.to_string(), value));
        self
    }

    pub(crate) fn string(self, key: &str, value: &str) -> Self {
        self.value(key, MetadataValue::String(value.to_string()))
    }

    pub(crate) fn string_array<S: AsRef<str>>(self, key: &str, values: &[S]) -> Self {
        let items = values
            .iter()
            .map(|v| MetadataValue::String(v.as_ref().to_string()))
            .collect();
        self.value(key, MetadataValue::Array(ValueType::String, items))
    }

    /// Tensor with raw bytes; `shape` is in GGUF order (fastest dimension first)
    pub(crate) fn tensor_raw(mut self, name: &str, shape: &[u64], ggml_type: u32, data: Vec<u8>) -> Self {
        self.tensors.push(FixtureTensor {
            name: name.to_string(),
            shape: shape.to_vec(),
            ggml_type,
            data,
        });
        self
    }

    pub(crate) fn tensor_f32_shaped(self, name: &str, shape: &[u64], values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.tensor_raw(name, shape, DType::F32.code(), data)
    }

    pub(crate) fn tensor_f16_shaped(self, name: &str, shape: &[u64], values: &[f32]) -> Self {
        let data = values
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        self.tensor_raw(name, shape, DType::F16.code(), data)
    }

    pub(crate) fn tensor_f32(self, name: &str, values: &[f32]) -> Self {
        self.tensor_f32_shaped(name, &[values.len() as u64], values)
    }

    pub(crate) fn tensor_f16(self, name: &str, values: &[f32]) -> Self {
        self.tensor_f16_shaped(name, &[values.len() as u64], values)
    }

    /// Magic, version and the two counts
    pub(crate) fn header_bytes(&self, tensor_count: u64, kv_count: u64) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC.to_le_bytes());
        out.extend_from_slice(&3u32.to_le_bytes());
        out.extend_from_slice(&tensor_count.to_le_bytes());
        out.extend_from_slice(&kv_count.to_le_bytes());
        out
    }

    fn alignment(&self) -> u64 {
        self.kvs
            .iter()
            .rev()
            .find(|(k, _)| k == ALIGNMENT_KEY)
            .and_then(|(_, v)| v.as_u64())
            .filter(|&a| a > 0)
            .unwrap_or(DEFAULT_ALIGNMENT)
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let alignment = self.alignment() as usize;
        let mut out = self.header_bytes(self.tensors.len() as u64, self.kvs.len() as u64);

        for (key, value) in &self.kvs {
            write_string(&mut out, key);
            out.extend_from_slice(&value.value_type().tag().to_le_bytes());
            write_value(&mut out, value);
        }

        let mut offset = 0usize;
        let mut offsets = Vec::with_capacity(self.tensors.len());
        for tensor in &self.tensors {
            offsets.push(offset);
            offset = (offset + tensor.data.len()).div_ceil(alignment) * alignment;
        }

        for (tensor, &offset) in self.tensors.iter().zip(&offsets) {
            write_string(&mut out, &tensor.name);
            out.extend_from_slice(&(tensor.shape.len() as u32).to_le_bytes());
            for &dim in &tensor.shape {
                out.extend_from_slice(&dim.to_le_bytes());
            }
            out.extend_from_slice(&tensor.ggml_type.to_le_bytes());
            out.extend_from_slice(&(offset as u64).to_le_bytes());
        }

        let data_start = out.len().div_ceil(alignment) * alignment;
        out.resize(data_start, 0);
        for (tensor, &offset) in self.tensors.iter().zip(&offsets) {
            out.resize(data_start + offset, 0);
            out.extend_from_slice(&tensor.data);
        }
        out
    }

    pub(crate) fn write_temp(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.to_bytes()).unwrap();
        file.flush().unwrap();
        file
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &MetadataValue) {
    match value {
        MetadataValue::U8(v) => out.push(*v),
        MetadataValue::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Bool(v) => out.push(*v as u8),
        MetadataValue::String(v) => write_string(out, v),
        MetadataValue::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
        MetadataValue::Array(item_type, items) => {
            out.extend_from_slice(&item_type.tag().to_le_bytes());
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_value(out, item);
            }
        }
    }
}
