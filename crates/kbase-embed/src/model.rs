use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use kbase_core::{Embedder, Error};

use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

/// BGE-family sentence embedder (XLM-RoBERTa encoder, mean pooled, L2
/// normalised) loaded from a local model directory.
pub struct BgeEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dim: usize,
    max_len: usize,
    pad_id: u32,
}

impl BgeEmbedder {
    /// Expects `tokenizer.json`, `config.json` and either `model.safetensors`
    /// or `pytorch_model.bin` inside `model_dir`.
    pub fn load(model_dir: &Path, max_len: usize) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), device = ?device.location(), "loading embedding model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let pad_id = tokenizer.token_to_id("<pad>").unwrap_or(1);

        let config_path = model_dir.join("config.json");
        let raw_config = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config: XLMRobertaConfig = serde_json::from_str(&raw_config)?;
        let dim = serde_json::from_str::<serde_json::Value>(&raw_config)?
            .get("hidden_size")
            .and_then(serde_json::Value::as_u64)
            .and_then(|d| usize::try_from(d).ok())
            .ok_or_else(|| anyhow!("{} has no hidden_size", config_path.display()))?;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;

        let model_id = model_dir
            .file_name()
            .map_or_else(|| "local-model".to_string(), |n| n.to_string_lossy().to_string());
        info!(model = %model_id, dim, "embedding model loaded");
        Ok(Self { model, tokenizer, device, model_id, dim, max_len, pad_id })
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, self.pad_id, &self.device)?;
        let token_type_ids = Tensor::zeros(input_ids.dims2()?, DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let vectors: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2()?;
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(anyhow!("model produced {} dims, config says {}", v.len(), self.dim));
        }
        let elapsed = start.elapsed();
        debug!(batch = texts.len(), ?elapsed, "embedded batch");
        if elapsed.as_secs() > 10 {
            warn!(batch = texts.len(), ?elapsed, "slow embedding batch");
        }
        Ok(vectors)
    }
}

impl Embedder for BgeEmbedder {
    fn model_id(&self) -> &str { &self.model_id }

    fn dim(&self) -> usize { self.dim }

    fn embed_batch(&self, texts: &[String]) -> kbase_core::Result<Vec<Vec<f32>>> {
        self.embed_texts(texts).map_err(|e| Error::embedding(format!("{e:#}")))
    }
}

/// Metal when the crate is built with the `metal` feature and a GPU answers,
/// otherwise CPU.
pub fn select_device() -> Device {
    #[cfg(feature = "metal")]
    {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => warn!(error = %e, "metal unavailable, embedding on cpu"),
        }
    }
    Device::Cpu
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        debug!(path = %safetensors.display(), "reading safetensors weights");
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    debug!(path = %pickle.display(), "reading pickled weights");
    let weights = candle_core::pickle::read_all(&pickle)
        .with_context(|| format!("Failed to read weights from {}", pickle.display()))?;
    Ok(weights.into_iter().collect())
}

/// Picks the model directory: the configured one, then `KBASE_MODEL_DIR`,
/// then `models/bge-m3` and `../models/bge-m3`.
pub fn resolve_model_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        if dir.exists() { return Ok(dir.to_path_buf()); }
        return Err(anyhow!("Configured model directory {} does not exist", dir.display()));
    }
    if let Ok(dir) = std::env::var("KBASE_MODEL_DIR") {
        let p = PathBuf::from(&dir);
        if p.exists() { return Ok(p); }
    }
    for candidate in ["models/bge-m3", "../models/bge-m3"] {
        let p = Path::new(candidate);
        if p.exists() { return Ok(p.to_path_buf()); }
    }
    Err(anyhow!("Could not locate an embedding model directory; set embedding.model_dir or use the hashed provider"))
}
