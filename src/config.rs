use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::error::{ProtocolError, Result};

pub const ENV_MAX_MESSAGE_BYTES: &str = "PLANWIRE_MAX_MESSAGE_BYTES";
pub const ENV_MAX_PLAN_LOG_ENTRIES: &str = "PLANWIRE_MAX_PLAN_LOG_ENTRIES";

const DEFAULT_MAX_MESSAGE_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_MAX_PLAN_LOG_ENTRIES: usize = 10_000;

/// Runtime limits and codec settings.
///
/// YAML example:
/// ```yaml
/// max_message_bytes: 1048576
/// max_plan_log_entries: 256
/// codec_pretty: false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RuntimeConfig {
    /// Encoded messages above this size are refused by the transport.
    pub max_message_bytes: usize,
    /// Upper bound on messages one plan may record.
    pub max_plan_log_entries: usize,
    pub codec_pretty: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_plan_log_entries: DEFAULT_MAX_PLAN_LOG_ENTRIES,
            codec_pretty: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: RuntimeConfig = serde_yaml::from_str(raw)
            .map_err(|err| ProtocolError::Config(format!("failed to parse config: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            ProtocolError::Config(format!("failed to read '{}': {err}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Apply `PLANWIRE_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_positive(ENV_MAX_MESSAGE_BYTES)? {
            self.max_message_bytes = v;
        }
        if let Some(v) = env_positive(ENV_MAX_PLAN_LOG_ENTRIES)? {
            self.max_plan_log_entries = v;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_message_bytes == 0 {
            return Err(ProtocolError::Config(
                "max_message_bytes must be >= 1".to_string(),
            ));
        }
        if self.max_plan_log_entries == 0 {
            return Err(ProtocolError::Config(
                "max_plan_log_entries must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_positive(key: &str) -> Result<Option<usize>> {
    let Some(raw) = env::var(key).ok() else {
        return Ok(None);
    };
    match raw.trim().parse::<usize>() {
        Ok(v) if v > 0 => Ok(Some(v)),
        _ => Err(ProtocolError::Config(format!(
            "invalid {key}: '{raw}' (must be a positive integer)"
        ))),
    }
}
