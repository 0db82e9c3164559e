use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

// Outbox dialing and framing configuration sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    // Upper bound on establishing the stream to the consumer node.
    pub connection_timeout_ms: u64,
    // Max frame size accepted on flow streams.
    pub max_frame_bytes: usize,
    // TLS server name presented when dialing consumer nodes.
    pub server_name: String,
}

const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_SERVER_NAME: &str = "localhost";

#[derive(Debug, Deserialize)]
struct OutboxConfigOverride {
    connection_timeout_ms: Option<u64>,
    max_frame_bytes: Option<usize>,
    server_name: Option<String>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            server_name: DEFAULT_SERVER_NAME.to_string(),
        }
    }
}

impl OutboxConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn from_env() -> Result<Self> {
        let connection_timeout_ms = std::env::var("FLOW_OUTBOX_CONNECTION_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_MS);
        let max_frame_bytes = std::env::var("FLOW_MAX_FRAME_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);
        let server_name = std::env::var("FLOW_SERVER_NAME")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_NAME.to_string());
        Ok(Self {
            connection_timeout_ms,
            max_frame_bytes,
            server_name,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("FLOW_OUTBOX_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read FLOW_OUTBOX_CONFIG: {path}"))?;
            let override_cfg: OutboxConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse outbox config yaml")?;
            if let Some(value) = override_cfg.connection_timeout_ms
                && value > 0
            {
                config.connection_timeout_ms = value;
            }
            if let Some(value) = override_cfg.max_frame_bytes
                && value > 0
            {
                config.max_frame_bytes = value;
            }
            if let Some(value) = override_cfg.server_name {
                if value.trim().is_empty() {
                    return Err(flow_common::Error::Config(format!(
                        "server_name in {path} must not be empty"
                    ))
                    .into());
                }
                config.server_name = value;
            }
        }
        Ok(config)
    }
}
