//! Pipeline configuration, loaded from TOML with sensible defaults.
//!
//! API keys may also come from the environment (`DOCUFLOW_OCR_API_KEY`,
//! `DOCUFLOW_LLM_API_KEY`) so credentials can stay out of the config file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything the orchestrator needs, passed in at construction rather than
/// read from ambient state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub classifier: ClassifierConfig,
    pub ocr: OcrConfig,
    pub structuring: StructuringConfig,
    pub retry: RetrySettings,
    pub batch: BatchConfig,
    pub output: OutputConfig,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: PipelineConfig = toml::from_str(&raw)?;
        config.detection.threshold = config.detection.threshold.clamp(0.0, 1.0);
        Ok(config)
    }

    /// Fill credentials from the environment when the file left them unset.
    pub fn apply_env(&mut self) {
        if self.ocr.api_key.is_none() {
            self.ocr.api_key = std::env::var("DOCUFLOW_OCR_API_KEY").ok();
        }
        if self.structuring.api_key.is_none() {
            self.structuring.api_key = std::env::var("DOCUFLOW_LLM_API_KEY").ok();
        }
    }
}

/// Detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Regions with detector confidence strictly below this never enter the
    /// pipeline or the persisted output.
    pub threshold: f32,
    /// ONNX detection model weights (used with the `onnx` feature).
    pub model_path: Option<PathBuf>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { threshold: 0.35, model_path: None }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// ONNX classification model weights (used with the `onnx` feature).
    pub model_path: Option<PathBuf>,
}

/// Cloud text-extraction endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self { endpoint: None, api_key: None, timeout_secs: 30 }
    }
}

/// Cloud language-model structuring endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuringConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self { endpoint: None, api_key: None, model: None, timeout_secs: 60 }
    }
}

/// Bounded retry with exponential backoff, shared by the network-bound
/// adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt (0 means try once).
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Documents processed concurrently. Stages within a document stay
    /// strictly ordered regardless.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Result store root directory.
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { root: PathBuf::from("processed") }
    }
}
