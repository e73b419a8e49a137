//! GGUF container reader
//!
//! Parses the header, the typed key-value metadata section and the tensor
//! directory of a GGUF file, and gives bounds-checked access to each
//! tensor's bytes through a read-only memory map.
//!
//! ```text
//! ┌───────┬─────────┬──────────────┬──────────┬────────────┬─────────┬─────┬─────────────┐
//! │ magic │ version │ tensor_count │ kv_count │ kv entries │ tensors │ pad │ tensor data │
//! │  u32  │   u32   │     u64      │   u64    │            │         │     │             │
//! └───────┴─────────┴──────────────┴──────────┴────────────┴─────────┴─────┴─────────────┘
//! ```

mod reader;
#[cfg(test)]
pub(crate) mod testing;
mod value;

pub use value::{Metadata, MetadataValue, ValueType};

use crate::tensor::{DType, TensorView};
use crate::{Error, Result};
use memmap2::Mmap;
use reader::ByteReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// "GGUF" read as a little-endian u32
pub const GGUF_MAGIC: u32 = 0x4655_4747;

/// Tensor data alignment when `general.alignment` is absent
pub const DEFAULT_ALIGNMENT: u64 = 32;

/// Metadata key overriding the alignment
pub const ALIGNMENT_KEY: &str = "general.alignment";

// name length + n_dims + type + offset
const MIN_TENSOR_ENTRY: usize = 8 + 4 + 4 + 8;
// key length + type tag + smallest value
const MIN_KV_ENTRY: usize = 8 + 4 + 1;

/// One tensor directory entry
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    /// Tensor name (directory key)
    pub name: String,
    /// Number of dimensions
    pub n_dims: u32,
    /// Per-dimension extents
    pub shape: Vec<u64>,
    /// Raw GGML type code
    pub ggml_type: u32,
    /// Offset relative to the data section
    pub offset: u64,
}

impl TensorInfo {
    pub fn element_count(&self) -> u64 {
        self.shape.iter().product()
    }

    /// Storage type, if the code is known
    pub fn dtype(&self) -> Option<DType> {
        DType::from_code(self.ggml_type)
    }

    /// Bytes occupied in the data section, if the type is known
    pub fn byte_size(&self) -> Option<u64> {
        self.dtype().map(|d| d.byte_size(self.element_count()))
    }

    /// Human-readable type, falling back to the raw code
    pub fn type_name(&self) -> String {
        match self.dtype() {
            Some(dtype) => dtype.to_string(),
            None => format!("type{}", self.ggml_type),
        }
    }
}

/// Parsed header, metadata and tensor directory
#[derive(Debug, Clone)]
pub struct GgufMetadata {
    pub version: u32,
    pub tensor_count: u64,
    pub kv_count: u64,
    pub metadata: Metadata,
    pub tensors: Vec<TensorInfo>,
    /// Absolute offset where tensor data begins
    pub data_offset: u64,
}

impl GgufMetadata {
    /// Find a tensor by exact name
    pub fn tensor(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Data alignment in effect
    pub fn alignment(&self) -> u64 {
        self.metadata
            .get_u64(ALIGNMENT_KEY)
            .unwrap_or(DEFAULT_ALIGNMENT)
    }
}

/// Parse a complete GGUF byte image
pub fn parse(bytes: &[u8]) -> Result<GgufMetadata> {
    let mut r = ByteReader::new(bytes);

    let magic = r
        .read_u32()
        .map_err(|_| Error::format("file too short for GGUF magic"))?;
    if magic != GGUF_MAGIC {
        return Err(Error::format(format!(
            "not a GGUF file (magic {:#010x})",
            magic
        )));
    }

    let version = r.read_u32()?;
    if version < 2 {
        return Err(Error::format(format!(
            "GGUF version {} is not supported",
            version
        )));
    }

    let tensor_count = r.read_u64()?;
    let kv_count = r.read_u64()?;
    debug!(version, tensor_count, kv_count, "GGUF header");

    let mut metadata = Metadata::new();
    for _ in 0..kv_count {
        if r.remaining() < MIN_KV_ENTRY {
            return Err(Error::format(format!(
                "metadata truncated at offset {}",
                r.position()
            )));
        }
        let key = r.read_string()?;
        let ty = ValueType::from_tag(r.read_u32()?)?;
        let value = r.read_value(ty)?;
        metadata.insert(key, value);
    }

    let mut tensors = Vec::new();
    for _ in 0..tensor_count {
        if r.remaining() < MIN_TENSOR_ENTRY {
            return Err(Error::format(format!(
                "tensor directory truncated at offset {}",
                r.position()
            )));
        }
        tensors.push(read_tensor_info(&mut r)?);
    }

    let alignment = match metadata.get(ALIGNMENT_KEY) {
        None => DEFAULT_ALIGNMENT,
        Some(value) => match value.as_u64() {
            Some(a) if a > 0 => a,
            _ => {
                return Err(Error::format(format!(
                    "invalid {} value: {}",
                    ALIGNMENT_KEY, value
                )))
            }
        },
    };
    let end = r.position() as u64;
    let data_offset = end.div_ceil(alignment) * alignment;
    debug!(end, alignment, data_offset, "tensor directory parsed");

    Ok(GgufMetadata {
        version,
        tensor_count,
        kv_count,
        metadata,
        tensors,
        data_offset,
    })
}

fn read_tensor_info(r: &mut ByteReader<'_>) -> Result<TensorInfo> {
    let name = r.read_string()?;
    let n_dims = r.read_u32()?;
    if (n_dims as usize).saturating_mul(8) > r.remaining() {
        return Err(Error::format(format!(
            "tensor {} declares {} dimensions past end of file",
            name, n_dims
        )));
    }

    let mut shape = Vec::with_capacity(n_dims as usize);
    for _ in 0..n_dims {
        shape.push(r.read_u64()?);
    }
    if shape.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d)).is_none() {
        return Err(Error::format(format!(
            "tensor {} element count overflows",
            name
        )));
    }

    let ggml_type = r.read_u32()?;
    let offset = r.read_u64()?;

    Ok(TensorInfo {
        name,
        n_dims,
        shape,
        ggml_type,
        offset,
    })
}

/// Read only the metadata and directory of a GGUF file
pub fn read_metadata(path: impl AsRef<Path>) -> Result<GgufMetadata> {
    Ok(GgufFile::open(path)?.metadata)
}

/// A memory-mapped GGUF file with its parsed directory
pub struct GgufFile {
    path: PathBuf,
    /// Read-only view of the whole file
    mmap: Mmap,
    metadata: GgufMetadata,
}

impl GgufFile {
    /// Map and parse a GGUF file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        if file.metadata()?.len() == 0 {
            return Err(Error::format(format!("{} is empty", path.display())));
        }

        // SAFETY: the map is read-only and owned by this struct; the file is
        // not expected to be modified while a model is loaded.
        let mmap = unsafe { Mmap::map(&file)? };
        let metadata = parse(&mmap)?;

        Ok(Self {
            path,
            mmap,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &GgufMetadata {
        &self.metadata
    }

    /// File length in bytes
    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Exact byte range of a tensor's data
    pub fn tensor_bytes(&self, info: &TensorInfo) -> Result<&[u8]> {
        let size = info.byte_size().ok_or_else(|| Error::UnsupportedDType {
            tensor: info.name.clone(),
            dtype: info.type_name(),
        })?;

        let start = self.metadata.data_offset.checked_add(info.offset);
        let end = start.and_then(|s| s.checked_add(size));
        match (start, end) {
            (Some(start), Some(end)) if end <= self.len() => {
                Ok(&self.mmap[start as usize..end as usize])
            }
            _ => Err(Error::format(format!(
                "tensor {} data ({} bytes at offset {}) extends past end of file ({} bytes)",
                info.name,
                size,
                self.metadata.data_offset.saturating_add(info.offset),
                self.len()
            ))),
        }
    }

    /// Zero-copy view of a named tensor
    pub fn view(&self, name: &str) -> Result<TensorView<'_>> {
        let info = self
            .metadata
            .tensor(name)
            .ok_or_else(|| Error::TensorNotFound(name.to_string()))?;
        let dtype = info.dtype().ok_or_else(|| Error::UnsupportedDType {
            tensor: info.name.clone(),
            dtype: info.type_name(),
        })?;
        let bytes = self.tensor_bytes(info)?;
        TensorView::new(&info.name, bytes, dtype, info.element_count() as usize)
    }
}
