//! Validated Llama model file with a lazily populated tensor cache

mod config;

pub use config::{
    size_string, ModelConfig, HEAD_DIM, HIDDEN_SIZE, INTERMEDIATE_SIZE, MAX_SEQ_LEN, NUM_HEADS,
    NUM_KV_HEADS, NUM_LAYERS, ROPE_THETA, VOCAB_SIZE,
};

use crate::gguf::{GgufFile, GgufMetadata, TensorInfo};
use crate::tensor::{DType, Tensor};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Metadata key naming the architecture
pub const ARCHITECTURE_KEY: &str = "general.architecture";

/// Tensors a complete 16-layer file carries at minimum
pub const MIN_TENSOR_COUNT: usize = 100;

/// How projection and embedding weights are kept in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightStorageMode {
    /// Widen everything to f32 at load time
    #[default]
    F32,
    /// Keep F16-on-disk tensors as f16 and widen per element when used
    F16,
}

impl std::str::FromStr for WeightStorageMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "f32" => Ok(WeightStorageMode::F32),
            "f16" => Ok(WeightStorageMode::F16),
            other => Err(format!("unknown storage mode '{}', expected f16 or f32", other)),
        }
    }
}

impl std::fmt::Display for WeightStorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightStorageMode::F32 => f.write_str("f32"),
            WeightStorageMode::F16 => f.write_str("f16"),
        }
    }
}

/// Load-time options
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Require at least [`MIN_TENSOR_COUNT`] tensors
    pub strict_tensor_count: bool,
    /// Dimensions the engine will run with
    pub config: ModelConfig,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            strict_tensor_count: true,
            config: ModelConfig::llama_3_2_1b(),
        }
    }
}

/// An open GGUF model
///
/// The file stays memory-mapped for the lifetime of the model. Each tensor is
/// decoded at most once per storage precision; later lookups return the same
/// shared buffer.
pub struct Model {
    file: GgufFile,
    config: ModelConfig,
    f32_cache: Mutex<HashMap<String, Tensor>>,
    f16_cache: Mutex<HashMap<String, Tensor>>,
}

impl Model {
    /// Open and validate a Llama 3.2 1B GGUF file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ModelOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: ModelOptions) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading model from {:?}", path);

        let file = GgufFile::open(path)?;
        let metadata = file.metadata();

        match metadata.metadata.get_str(ARCHITECTURE_KEY) {
            Some("llama") => {}
            Some(other) => {
                return Err(Error::Validation(format!(
                    "unsupported architecture '{}', expected llama",
                    other
                )))
            }
            None => {
                return Err(Error::Validation(format!(
                    "missing {} metadata",
                    ARCHITECTURE_KEY
                )))
            }
        }

        if options.strict_tensor_count && metadata.tensors.len() < MIN_TENSOR_COUNT {
            return Err(Error::Validation(format!(
                "expected at least {} tensors, found {}",
                MIN_TENSOR_COUNT,
                metadata.tensors.len()
            )));
        }

        options.config.validate()?;
        for (key, found, expected) in options.config.metadata_mismatches(&metadata.metadata) {
            warn!(key, found, expected, "metadata disagrees with model dimensions");
        }

        info!(
            "GGUF v{}: {} tensors, {} metadata entries, {} layers, hidden_size={}",
            metadata.version,
            metadata.tensors.len(),
            metadata.metadata.len(),
            options.config.num_hidden_layers,
            options.config.hidden_size
        );

        Ok(Self {
            file,
            config: options.config,
            f32_cache: Mutex::new(HashMap::new()),
            f16_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Parsed header, metadata and tensor directory
    pub fn metadata(&self) -> &GgufMetadata {
        self.file.metadata()
    }

    pub fn has_tensor(&self, name: &str) -> bool {
        self.tensor_info(name).is_some()
    }

    pub fn tensor_info(&self, name: &str) -> Option<&TensorInfo> {
        self.file.metadata().tensor(name)
    }

    /// Load a tensor as f32, widening F16 data
    pub fn map_tensor(&self, name: &str) -> Result<Tensor> {
        load_cached(&self.f32_cache, name, || {
            self.file.view(name)?.to_f32_tensor()
        })
    }

    /// Load a tensor stored as F16 without widening it
    pub fn map_tensor_f16(&self, name: &str) -> Result<Tensor> {
        load_cached(&self.f16_cache, name, || {
            self.file.view(name)?.to_f16_tensor()
        })
    }

    /// Load a weight honoring the storage mode
    pub fn map_weight(&self, name: &str, mode: WeightStorageMode) -> Result<Tensor> {
        let on_disk = self.tensor_info(name).and_then(TensorInfo::dtype);
        match (mode, on_disk) {
            (WeightStorageMode::F16, Some(DType::F16)) => self.map_tensor_f16(name),
            _ => self.map_tensor(name),
        }
    }

    /// Bytes held by decoded tensors
    pub fn cached_bytes(&self) -> usize {
        [&self.f32_cache, &self.f16_cache]
            .iter()
            .map(|cache| {
                cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .map(Tensor::size_in_bytes)
                    .sum::<usize>()
            })
            .sum()
    }
}

// The lock is held across the load so two first-time lookups of one name
// decode it once. A failed load inserts nothing.
fn load_cached(
    cache: &Mutex<HashMap<String, Tensor>>,
    name: &str,
    load: impl FnOnce() -> Result<Tensor>,
) -> Result<Tensor> {
    let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(tensor) = cache.get(name) {
        return Ok(tensor.clone());
    }

    let tensor = load()?;
    debug!(name, dtype = %tensor.dtype(), len = tensor.len(), "mapped tensor");
    cache.insert(name.to_string(), tensor.clone());
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gguf::testing::GgufBuilder;

    fn fixture() -> GgufBuilder {
        GgufBuilder::new()
            .string(ARCHITECTURE_KEY, "llama")
            .tensor_f32("norm", &[1.0, 2.0, 3.0])
            .tensor_f16("half", &[0.5, -1.0])
            .tensor_raw("quant", &[32], DType::Q8_0.code(), vec![0u8; 34])
    }

    fn open_relaxed(builder: &GgufBuilder) -> (tempfile::NamedTempFile, Result<Model>) {
        let file = builder.write_temp();
        let options = ModelOptions {
            strict_tensor_count: false,
            ..Default::default()
        };
        let model = Model::open_with(file.path(), options);
        (file, model)
    }

    #[test]
    fn test_map_tensor_is_cached() {
        let (_file, model) = open_relaxed(&fixture());
        let model = model.unwrap();

        let a = model.map_tensor("norm").unwrap();
        let b = model.map_tensor("norm").unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.to_f32_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(model.cached_bytes(), 12);
    }

    #[test]
    fn test_storage_modes() {
        let (_file, model) = open_relaxed(&fixture());
        let model = model.unwrap();

        let wide = model.map_weight("half", WeightStorageMode::F32).unwrap();
        let native = model.map_weight("half", WeightStorageMode::F16).unwrap();
        assert_eq!(wide.dtype(), DType::F32);
        assert_eq!(native.dtype(), DType::F16);
        assert_eq!(wide.to_f32_vec(), native.to_f32_vec());

        // F32 data stays F32 in either mode
        let norm = model.map_weight("norm", WeightStorageMode::F16).unwrap();
        assert_eq!(norm.dtype(), DType::F32);
        assert!(model.map_tensor_f16("norm").is_err());
    }

    #[test]
    fn test_lookup_errors_leave_cache_empty() {
        let (_file, model) = open_relaxed(&fixture());
        let model = model.unwrap();

        assert!(model.has_tensor("quant"));
        assert!(!model.has_tensor("missing"));
        assert!(matches!(
            model.map_tensor("missing"),
            Err(Error::TensorNotFound(_))
        ));
        assert!(matches!(
            model.map_tensor("quant"),
            Err(Error::UnsupportedDType { .. })
        ));
        assert_eq!(model.cached_bytes(), 0);
    }

    #[test]
    fn test_architecture_validation() {
        let (_file, model) = open_relaxed(&GgufBuilder::new().string("general.name", "x"));
        assert!(matches!(model, Err(Error::Validation(_))));

        let (_file, model) = open_relaxed(&GgufBuilder::new().string(ARCHITECTURE_KEY, "gemma"));
        assert!(matches!(model, Err(Error::Validation(_))));
    }

    #[test]
    fn test_strict_tensor_count() {
        let file = fixture().write_temp();
        assert!(matches!(Model::open(file.path()), Err(Error::Validation(_))));
    }

    #[test]
    fn test_storage_mode_parsing() {
        assert_eq!("F16".parse::<WeightStorageMode>().unwrap(), WeightStorageMode::F16);
        assert_eq!("f32".parse::<WeightStorageMode>().unwrap(), WeightStorageMode::F32);
        assert!("bf16".parse::<WeightStorageMode>().is_err());
    }
}
