//! Layered configuration and path helpers.
//!
//! Figment merges built-in defaults, `config.toml`, `config.<env>.toml` and
//! `KBASE_*` environment variables (nested keys split on `__`, e.g.
//! `KBASE_CHUNKING__CHUNK_SIZE=500`). `RUST_ENV` picks the env file.

use std::borrow::Cow;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::validate_collection_name;

pub const ENV_PREFIX: &str = "KBASE_";

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    /// Loads configuration relative to the working directory.
    pub fn load() -> Result<Self> {
        let cwd = env::current_dir().map_err(|e| Error::InvalidConfig(format!("cannot read working directory: {e}")))?;
        Self::load_from(&cwd)
    }

    /// Loads `config.toml` and its env overlay from `dir`; relative paths in
    /// the settings resolve against `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Ok(Self { figment, base_dir: dir.to_path_buf() })
    }

    /// Typed, validated settings with paths resolved.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.storage_root = resolve_with_base(&self.base_dir, settings.storage_root.to_string_lossy());
        if let Some(dir) = settings.embedding.model_dir.take() {
            settings.embedding.model_dir = Some(resolve_with_base(&self.base_dir, dir.to_string_lossy()));
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage_root: PathBuf,
    pub default_collection: String,
    pub top_k: usize,
    pub chunking: ChunkingSettings,
    pub loader: LoaderSettings,
    pub embedding: EmbeddingSettings,
    pub timeouts: TimeoutSettings,
    pub retry: RetrySettings,
    pub answer: AnswerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./db_storage"),
            default_collection: "knowledge_base".to_string(),
            top_k: 3,
            chunking: ChunkingSettings::default(),
            loader: LoaderSettings::default(),
            embedding: EmbeddingSettings::default(),
            timeouts: TimeoutSettings::default(),
            retry: RetrySettings::default(),
            answer: AnswerSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunking.chunk_size must be positive".into()));
        }
        if chunking.chunk_overlap >= chunking.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_concurrency == 0 {
            return Err(Error::InvalidConfig("embedding.batch_size and embedding.max_concurrency must be positive".into()));
        }
        if self.embedding.provider == EmbeddingProvider::Hashed && self.embedding.dim == 0 {
            return Err(Error::InvalidConfig("embedding.dim must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if self.top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be positive".into()));
        }
        validate_collection_name(&self.default_collection)
            .map_err(|e| Error::InvalidConfig(format!("default_collection: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows of an oversized run of text.
    pub chunk_overlap: usize,
    /// Paragraph separator; empty disables paragraph packing.
    pub separator: String,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { chunk_size: 2000, chunk_overlap: 200, separator: "\n\n".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// WHATWG label of the 8-bit encoding tried when a text file is not UTF-8.
    pub fallback_encoding: String,
}

impl Default for LoaderSettings {
    fn default() -> Self { Self { fallback_encoding: "gb18030".to_string() } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local transformer weights run with candle.
    Local,
    /// Deterministic feature hashing, no model files needed.
    Hashed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model_dir: Option<PathBuf>,
    /// Token budget per text for the local model.
    pub max_len: usize,
    /// Output dimension of the hashed provider.
    pub dim: usize,
    pub batch_size: usize,
    pub max_concurrency: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model_dir: None,
            max_len: 512,
            dim: 1024,
            batch_size: 16,
            max_concurrency: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub embed_secs: u64,
    pub storage_secs: u64,
    pub answer_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self { Self { embed_secs: 120, storage_secs: 60, answer_secs: 120 } }
}

impl TimeoutSettings {
    pub fn embed(&self) -> Duration { Duration::from_secs(self.embed_secs) }
    pub fn storage(&self) -> Duration { Duration::from_secs(self.storage_secs) }
    pub fn answer(&self) -> Duration { Duration::from_secs(self.answer_secs) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self { Self { max_attempts: 3, base_delay_ms: 200 } }
}

impl RetrySettings {
    /// Backoff before retry number `attempt` (1-based): base, 2*base, 4*base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnswerSettings {
    /// OpenAI-compatible API root, e.g. `https://api.deepseek.com/v1`.
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key_env: "KBASE_ANSWER_API_KEY".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

impl AnswerSettings {
    pub fn is_configured(&self) -> bool { self.base_url.is_some() && self.model.is_some() }
}

/// Expands `${VAR}`/`$VAR` and a leading `~`. Unknown variables are left as
/// written. The result is not canonicalised.
pub fn expand_path(input: &str) -> PathBuf {
    let with_vars = shellexpand::env(input).unwrap_or(Cow::Borrowed(input));
    PathBuf::from(shellexpand::tilde(&with_vars).into_owned())
}

/// Expands `raw` and anchors it at `base` unless it is already absolute.
pub fn resolve_with_base(base: &Path, raw: impl AsRef<str>) -> PathBuf {
    let path = expand_path(raw.as_ref());
    if path.is_absolute() {
        return path;
    }
    base.join(path)
}
