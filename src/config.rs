use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Complete configuration for a Bridge conversion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub source: SourceConfig,
    pub output: OutputConfig,
    pub episode: EpisodeConfig,
    pub embedding: EmbeddingConfig,
}

/// Where the raw dataset lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Root of the directory tree that contains one or more `raw/` folders.
    pub root: PathBuf,
}

/// Where and how the converted dataset is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory for the columnar dataset (default: "data/bridge").
    pub dir: PathBuf,
    /// Replace an existing output directory instead of refusing to run.
    #[serde(default)]
    pub overwrite: bool,
}

/// Episode normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeConfig {
    /// Frame height every image slot is normalized to (default: 480).
    pub frame_height: u32,
    /// Frame width every image slot is normalized to (default: 640).
    pub frame_width: u32,
    /// Load `agent_data` files and take the episode length from `term_t`
    /// instead of the policy-output length (default: false).
    #[serde(default)]
    pub use_agent_data: bool,
    /// Log and skip trajectories with malformed files instead of aborting
    /// the whole run (default: false).
    #[serde(default)]
    pub skip_malformed: bool,
}

/// Sentence-embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// When false, every step carries a zero embedding and no API calls are made.
    pub enabled: bool,
    /// Base URL for the embedding API.
    pub api_base: String,
    /// Model identifier for embeddings.
    pub model_id: String,
    /// API key for the embedding model.
    pub api_key: String,
    /// Vector size requested from the API and written per step (default: 512).
    pub dimensions: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                root: PathBuf::from("/home/DATA_SHARE/bridge_data"),
            },
            output: OutputConfig {
                dir: PathBuf::from("data/bridge"),
                overwrite: false,
            },
            episode: EpisodeConfig {
                frame_height: 480,
                frame_width: 640,
                use_agent_data: false,
                skip_malformed: false,
            },
            embedding: EmbeddingConfig {
                enabled: false,
                api_base: "https://api.openai.com/v1".into(),
                model_id: "text-embedding-3-small".into(),
                api_key: String::new(),
                dimensions: 512,
            },
        }
    }
}

impl ConverterConfig {
    /// Read a JSON configuration file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }
}
