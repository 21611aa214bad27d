use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_TEST_MODE_CAP: usize = 5;
pub const DEFAULT_PLAN_CAP: usize = 30;
pub const DEFAULT_SEPARATOR: &str = "---";
pub const DEFAULT_ERROR_MAX_CHARS: usize = 500;

/// Knobs for one deck run. Every field has a default so partial JSON files
/// only need to name what they change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    pub batch_size: usize,
    pub test_mode_cap: usize,
    pub plan_cap: usize,
    pub separator: String,
    pub error_max_chars: usize,
    /// Provider transport knobs: `request_timeout`, `transport_retries`,
    /// `retry_backoff`. Out-of-range values are clamped by the provider.
    pub provider_options: Map<String, Value>,
}

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            test_mode_cap: DEFAULT_TEST_MODE_CAP,
            plan_cap: DEFAULT_PLAN_CAP,
            separator: DEFAULT_SEPARATOR.to_string(),
            error_max_chars: DEFAULT_ERROR_MAX_CHARS,
            provider_options: Map::new(),
        }
    }
}

impl DeckConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("invalid deck config JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("failed loading {}", path.display()))
    }

    /// Explicit path, then `DECKR_CONFIG`, then defaults; env knob overrides
    /// are applied last.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit.map(Path::to_path_buf).or_else(config_override_path) {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_usize("DECKR_BATCH_SIZE")? {
            self.batch_size = value;
        }
        if let Some(value) = env_usize("DECKR_PLAN_MAX")? {
            self.plan_cap = value;
        }
        if let Some(value) = env_usize("DECKR_TEST_MODE_CAP")? {
            self.test_mode_cap = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.test_mode_cap == 0 || self.plan_cap == 0 {
            bail!("slide caps must be at least 1");
        }
        if self.separator.trim().is_empty() {
            bail!("separator must not be blank");
        }
        Ok(())
    }
}

fn config_override_path() -> Option<PathBuf> {
    env::var("DECKR_CONFIG")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    let Ok(raw) = env::var(key) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value = trimmed
        .parse::<usize>()
        .with_context(|| format!("{key} must be a non-negative integer (got '{trimmed}')"))?;
    Ok(Some(value))
}
