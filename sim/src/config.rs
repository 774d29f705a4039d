//! Configuration management for the consultation simulator

use consult_core::ConsultationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub surface: SurfaceConfig,
    pub consultation: ConsultationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub show_timestamps: bool,
    pub peer_name: String,
    /// Give up waiting for a reply or call phase after this many seconds.
    pub wait_timeout_secs: u64,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            show_timestamps: true,
            peer_name: "Doctor".to_string(),
            wait_timeout_secs: 30,
        }
    }
}

impl Config {
    pub async fn load(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path).await?;
            let config: Config = toml::from_str(&content)?;
            config.consultation.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path).await?;
            tracing::info!("Created default config at {}", path);
            Ok(config)
        }
    }

    pub async fn save(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }
}
