use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_inference_url() -> String {
    "http://localhost:8001".to_string()
}
fn default_rate_limit_minute() -> u32 {
    60
}
fn default_rate_limit_hour() -> u32 {
    1000
}

/// Gateway configuration, loadable from `.toml`/`.json` and overridable by
/// environment variables — the teacher's `GatewayConfig::load` pattern,
/// with the business config (the original's etcd-sourced domains/clusters)
/// replaced by the handful of settings this gateway actually needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_inference_url")]
    pub inference_url: String,
    #[serde(default = "default_rate_limit_minute")]
    pub rate_limit_minute: u32,
    #[serde(default = "default_rate_limit_hour")]
    pub rate_limit_hour: u32,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub bypass_rate_limits: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            inference_url: default_inference_url(),
            rate_limit_minute: default_rate_limit_minute(),
            rate_limit_hour: default_rate_limit_hour(),
            redis_url: None,
            bypass_rate_limits: false,
        }
    }
}

impl GatewayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: GatewayConfig = if path.exists() {
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
            GatewayConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BYPASS_RATE_LIMITS") {
            self.bypass_rate_limits = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis_url = Some(v);
        }
        if let Ok(v) = std::env::var("INFERENCE_URL") {
            self.inference_url = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.inference_url.is_empty() {
            anyhow::bail!("inference_url cannot be empty");
        }
        if self.rate_limit_minute == 0 || self.rate_limit_hour == 0 {
            anyhow::bail!("rate limits must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_absent() {
        let config = GatewayConfig::load(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.inference_url, "http://localhost:8001");
    }
}
