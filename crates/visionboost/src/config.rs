use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the video enhancement service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    /// Directory where uploads are staged while a request is in flight
    pub staging_dir: PathBuf,
    /// Directory holding finished artifacts available for download
    pub output_dir: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Hard wall-clock limit for a single transcode
    pub transcode_timeout_secs: u64,
    /// Number of transcodes allowed to run at the same time
    pub max_concurrent_transcodes: usize,
    /// Requests allowed to wait for a transcode slot before new ones are rejected
    pub max_queued_requests: usize,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: u64,
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Port the HTTP server listens on
    pub port: u16,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl EnhancerConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            staging_dir: PathBuf::from("data/uploads"),
            output_dir: PathBuf::from("data/enhanced"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            transcode_timeout_secs: 600,
            max_concurrent_transcodes: 2,
            max_queued_requests: 8,
            max_upload_bytes: 2 * 1024 * 1024 * 1024, // 2GB
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                config = if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?
                } else {
                    serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?
                };
            } else {
                log::warn!("Config file {} not found, using defaults", config_path.display());
            }
        }

        Ok(config)
    }

    /// Apply `PORT` and `VISIONBOOST_BIND` from the environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = std::env::var("PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {}", port))?;
        }
        if let Ok(bind) = std::env::var("VISIONBOOST_BIND") {
            if !bind.trim().is_empty() {
                self.bind_address = bind.trim().to_string();
            }
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_transcodes == 0 {
            bail!("max_concurrent_transcodes must be at least 1");
        }
        if self.transcode_timeout_secs == 0 {
            bail!("transcode_timeout_secs must be greater than zero");
        }
        if self.max_upload_bytes == 0 {
            bail!("max_upload_bytes must be greater than zero");
        }
        if self.staging_dir == self.output_dir {
            bail!(
                "staging_dir and output_dir must differ (both are {})",
                self.staging_dir.display()
            );
        }
        Ok(())
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    /// Socket address string for the HTTP listener
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}
