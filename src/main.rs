//! llama3-gguf CLI: inspect GGUF files and chat with Llama 3.2 1B

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use llama3_gguf::gguf::{self, ALIGNMENT_KEY};
use llama3_gguf::model::{size_string, ARCHITECTURE_KEY};
use llama3_gguf::tensor::ops::RMS_NORM_EPS;
use llama3_gguf::{
    EngineOptions, InferenceEngine, KernelBackend, KernelKind, Model, ModelConfig, Result, Tokenizer,
    WeightStorageMode,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llama3-gguf")]
#[command(about = "Llama 3.2 1B inference from GGUF files", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show container and model information
    Info {
        /// Path to a GGUF file
        #[arg(short, long)]
        model: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List tensors in a model
    Tensors {
        /// Path to a GGUF file
        #[arg(short, long)]
        model: PathBuf,

        /// Filter by pattern
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Answer a prompt with the Llama 3 chat template
    Chat {
        /// Path to a GGUF file
        #[arg(short, long)]
        model: PathBuf,

        /// User message
        #[arg(short, long)]
        prompt: String,

        /// System message (empty to omit)
        #[arg(long, default_value = "You are a helpful assistant.")]
        system: String,

        /// Maximum tokens to generate
        #[arg(long, default_value = "256")]
        max_tokens: usize,

        /// Weight precision in memory (f16 or f32)
        #[arg(long, default_value = "f16")]
        storage: WeightStorageMode,

        /// Kernel provider (sequential, parallel or hybrid:<kernels>)
        #[arg(long, default_value = "sequential")]
        backend: KernelBackend,

        /// Run only these kernels in parallel (project, normalize, rotate, silu, softmax, attention)
        #[arg(long, value_delimiter = ',', conflicts_with = "backend")]
        parallel_kernels: Vec<KernelKind>,
    },

    /// Print the token ids of a text
    Encode {
        /// Path to a GGUF file
        #[arg(short, long)]
        model: PathBuf,

        /// Text to tokenize
        #[arg(short, long)]
        text: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("llama3_gguf=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info { model, json } => show_model_info(&model, json)?,
        Commands::Tensors { model, filter } => list_tensors(&model, filter.as_deref())?,
        Commands::Chat {
            model,
            prompt,
            system,
            max_tokens,
            storage,
            backend,
            parallel_kernels,
        } => {
            let backend = if parallel_kernels.is_empty() {
                backend
            } else {
                KernelBackend::Hybrid(parallel_kernels.into_iter().collect())
            };
            run_chat(&model, &system, &prompt, max_tokens, EngineOptions { storage, backend })?
        }
        Commands::Encode { model, text } => encode(&model, &text)?,
    }

    Ok(())
}

fn run_chat(
    model_path: &Path,
    system: &str,
    prompt: &str,
    max_tokens: usize,
    options: EngineOptions,
) -> Result<()> {
    println!("Loading model from: {}", model_path.display());
    let model = Arc::new(Model::open(model_path)?);
    let engine = InferenceEngine::new(model, options)?;

    println!("Model loaded:");
    println!("  Layers: {}", engine.config().num_hidden_layers);
    println!("  Hidden size: {}", engine.config().hidden_size);
    println!("  Vocab size: {}", engine.tokenizer().vocab_size());
    println!("  Weights: {}, kernels: {}", engine.storage_mode(), engine.kernels().name());
    println!("\nPrompt: {}", prompt);

    let pb = ProgressBar::new(max_tokens as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} tokens")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut session = engine.new_session();
    let answer = engine.chat_with(&mut session, system, prompt, max_tokens, |_| pb.inc(1))?;
    pb.finish_and_clear();

    println!("\n=== Response ===");
    println!("{}", answer);
    println!("================");

    Ok(())
}

#[derive(Serialize)]
struct ModelInfo<'a> {
    path: String,
    version: u32,
    tensor_count: u64,
    kv_count: u64,
    alignment: u64,
    data_offset: u64,
    architecture: Option<&'a str>,
    name: Option<&'a str>,
    config: ModelConfig,
    rms_norm_eps: f32,
    parameters: usize,
}

fn show_model_info(model_path: &Path, json: bool) -> Result<()> {
    let meta = gguf::read_metadata(model_path)?;
    let config = ModelConfig::llama_3_2_1b();

    let info = ModelInfo {
        path: model_path.display().to_string(),
        version: meta.version,
        tensor_count: meta.tensor_count,
        kv_count: meta.kv_count,
        alignment: meta.alignment(),
        data_offset: meta.data_offset,
        architecture: meta.metadata.get_str(ARCHITECTURE_KEY),
        name: meta.metadata.get_str("general.name"),
        parameters: config.parameter_count(),
        config,
        rms_norm_eps: RMS_NORM_EPS,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Model Information");
    println!("=================");
    println!("GGUF version: {}", info.version);
    println!("Tensors: {}", info.tensor_count);
    println!("Metadata entries: {}", info.kv_count);
    println!("Alignment: {} (data at {})", info.alignment, info.data_offset);
    println!("Architecture: {}", info.architecture.unwrap_or("<missing>"));
    if let Some(name) = info.name {
        println!("Name: {}", name);
    }
    println!();
    println!("Hidden size: {}", info.config.hidden_size);
    println!("Layers: {}", info.config.num_hidden_layers);
    println!("Attention heads: {}", info.config.num_attention_heads);
    println!("KV heads: {}", info.config.num_key_value_heads);
    println!("GQA ratio: {}x", info.config.gqa_ratio());
    println!("Intermediate size: {}", info.config.intermediate_size);
    println!("Vocab size: {}", info.config.vocab_size);
    println!("Max sequence: {}", info.config.max_seq_len);
    println!("RoPE theta: {}", info.config.rope_theta);
    println!("RMS epsilon: {}", info.rms_norm_eps);
    println!("Parameters: {:.2}B", info.parameters as f64 / 1e9);
    println!("KV cache: {}", size_string(info.config.kv_cache_bytes()));
    println!();
    println!("Metadata:");
    for (key, value) in meta.metadata.iter() {
        if key == ALIGNMENT_KEY || key.starts_with("general.") || key.starts_with("llama.") {
            println!("  {} ({}) = {}", key, value.type_name(), value);
        }
    }

    Ok(())
}

fn list_tensors(model_path: &Path, filter: Option<&str>) -> Result<()> {
    let meta = gguf::read_metadata(model_path)?;

    println!("Tensors in model:");
    println!("=================");

    let mut count = 0;
    let mut bytes = 0u64;
    for info in &meta.tensors {
        if let Some(f) = filter {
            if !info.name.contains(f) {
                continue;
            }
        }
        let size = info.byte_size().unwrap_or(0);
        println!(
            "  {:<32} {:<6} {:?} {}",
            info.name,
            info.type_name(),
            info.shape,
            size_string(size as usize)
        );
        count += 1;
        bytes += size;
    }

    println!("\nTotal: {} tensors, {}", count, size_string(bytes as usize));

    Ok(())
}

fn encode(model_path: &Path, text: &str) -> Result<()> {
    let meta = gguf::read_metadata(model_path)?;
    let tokenizer = Tokenizer::from_metadata(&meta.metadata)?;
    let ids = tokenizer.encode(text)?;

    println!("{:?} ({} tokens)", ids, ids.len());
    for &id in &ids {
        println!("  {:>6} {:?}", id, tokenizer.decode_token(id));
    }

    Ok(())
}
