//! llama3-gguf: self-contained Llama 3.2 1B inference from GGUF files
//!
//! Loads weights straight out of a memory-mapped GGUF container, tokenizes
//! with the byte-level BPE vocabulary stored in the file, and generates text
//! with greedy decoding on the CPU.
//!
//! ## Key Features
//!
//! - **GGUF reader**: typed metadata and tensor directory with bounds-checked access
//! - **Tensor cache**: each weight decoded once, shared by reference afterwards
//! - **F16 or F32 weights**: keep half-precision weights native or widen at load
//! - **Pluggable kernels**: sequential reference loops or rayon data-parallel
//!   loops with bit-identical results
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       llama3-gguf                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ GgufFile    │  │ Model       │  │ InferenceEngine     │  │
//! │  │ (mmap)      │  │ (tensor     │  │ (Session: KV cache, │  │
//! │  │             │  │  cache)     │  │  greedy decoding)   │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Tokenizer   │  │ ChatFormat  │  │ Kernels             │  │
//! │  │ (BPE)       │  │ (Llama 3)   │  │ (seq / rayon)       │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ```no_run
//! use llama3_gguf::{EngineOptions, InferenceEngine, Model};
//! use std::sync::Arc;
//!
//! # fn main() -> llama3_gguf::Result<()> {
//! let model = Arc::new(Model::open("Llama-3.2-1B-Instruct-f16.gguf")?);
//! let engine = InferenceEngine::new(model, EngineOptions::default())?;
//! println!("{}", engine.chat("You are a helpful assistant.", "Tell a joke", 64)?);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod gguf;
pub mod inference;
pub mod kernels;
pub mod layer;
pub mod model;
pub mod tensor;
pub mod tokenizer;

// Re-exports
pub use error::{Error, Result};
pub use gguf::{GgufFile, GgufMetadata, Metadata, MetadataValue, TensorInfo};
pub use inference::{EngineOptions, GenerationConfig, InferenceEngine, Session};
pub use kernels::{KernelBackend, KernelKind, Kernels};
pub use layer::{KvCache, LayerLoader};
pub use model::{Model, ModelConfig, ModelOptions, WeightStorageMode};
pub use tensor::{DType, Tensor};
pub use tokenizer::{ChatFormat, Message, Role, Tokenizer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
