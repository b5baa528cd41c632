//! Engine settings from a config file and command-line overrides

use anyhow::{Context, Result};
use mchex_types::EngineSettings;
use std::path::Path;

/// Load settings from `config` (JSON) if given, then apply overrides
pub fn load(
    config: Option<&Path>,
    user_agent: Option<String>,
    connect_timeout: Option<u64>,
) -> Result<EngineSettings> {
    let mut settings = match config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => EngineSettings::default(),
    };

    if let Some(user_agent) = user_agent {
        settings.user_agent = user_agent;
    }
    if let Some(secs) = connect_timeout {
        settings.connect_timeout_secs = secs;
    }

    Ok(settings)
}
