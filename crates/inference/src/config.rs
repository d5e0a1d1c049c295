use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8001
}
fn default_model_name() -> String {
    "sentence-transformers/all-mpnet-base-v2".to_string()
}
fn default_max_batch_size() -> usize {
    32
}
fn default_batch_timeout_ms() -> u64 {
    10
}
fn default_num_batching_workers() -> usize {
    2
}

/// Inference service configuration, loadable from `.toml`/`.json` and
/// overridable by environment variables, mirroring the gateway's config
/// pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    #[serde(default = "default_num_batching_workers")]
    pub num_batching_workers: usize,
    /// Accepted for forward compatibility with the original model backend
    /// selection; ONNX execution itself is not implemented.
    #[serde(default)]
    pub use_onnx: bool,
    /// Disables batching entirely, routing each request through the
    /// service's bare single-item path instead of the batching scheduler.
    #[serde(default)]
    pub disable_batching: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model_name: default_model_name(),
            max_batch_size: default_max_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            num_batching_workers: default_num_batching_workers(),
            use_onnx: false,
            disable_batching: false,
        }
    }
}

impl InferenceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: InferenceConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match path.extension().and_then(|e| e.to_str()) {
                Some("toml") => toml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
                None => anyhow::bail!("config file has no extension, use .toml or .json"),
            }
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            InferenceConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MODEL_NAME") {
            self.model_name = v;
        }
        if let Ok(v) = std::env::var("MAX_BATCH_SIZE") {
            if let Ok(n) = v.parse() {
                self.max_batch_size = n;
            }
        }
        if let Ok(v) = std::env::var("BATCH_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.batch_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("NUM_BATCHING_WORKERS") {
            if let Ok(n) = v.parse() {
                self.num_batching_workers = n;
            }
        }
        if let Ok(v) = std::env::var("DISABLE_BATCHING") {
            self.disable_batching = v == "true" || v == "1";
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            anyhow::bail!("max_batch_size must be greater than zero");
        }
        if self.num_batching_workers == 0 {
            anyhow::bail!("num_batching_workers must be greater than zero");
        }
        if self.model_name.is_empty() {
            anyhow::bail!("model_name cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(InferenceConfig::default().validate().is_ok());
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_absent() {
        let config = InferenceConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.port, 8001);
        assert_eq!(config.max_batch_size, 32);
        assert_eq!(config.batch_timeout_ms, 10);
        assert_eq!(config.num_batching_workers, 2);
    }
}
