use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

pub const DEFAULT_MAX_DEPTH: u32 = 5;
pub const DEFAULT_STEP_TIMEOUT_MS: u64 = 30_000;

/// Engine-wide settings, usually read from a JSON file at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest nesting allowed for `execute_pattern`; the top-level run is depth 0
    pub max_depth: u32,
    /// Timeout for a step that does not set its own `timeout_ms`
    pub step_timeout_ms: u64,
    /// Directory of pattern definitions loaded by `Orchestrator::bootstrap`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            step_timeout_ms: DEFAULT_STEP_TIMEOUT_MS,
            pattern_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_step_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.step_timeout_ms = timeout_ms;
        self
    }

    pub fn with_pattern_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pattern_dir = Some(dir.into());
        self
    }

    /// Timeout for a step, honouring its own override.
    pub fn step_timeout(&self, override_ms: Option<u64>) -> Duration {
        Duration::from_millis(override_ms.unwrap_or(self.step_timeout_ms))
    }

    /// Read config from a JSON file
    pub async fn read(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "Config loaded successfully");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                Self::default()
            }
        }
    }

    /// Write config as pretty JSON, creating parent directories
    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir).await?;
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(path, content).await?;
        debug!(path = %path.display(), "Config saved successfully");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.step_timeout_ms, 30_000);
        assert!(config.pattern_dir.is_none());
    }

    #[test]
    fn test_step_timeout_override() {
        let config = EngineConfig::new().with_step_timeout_ms(100);
        assert_eq!(config.step_timeout(None), Duration::from_millis(100));
        assert_eq!(config.step_timeout(Some(5)), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_config_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig::read(&temp_dir.path().join("engine.json")).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_config_read_malformed_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert_eq!(EngineConfig::read(&path).await, EngineConfig::default());
    }

    #[tokio::test]
    async fn test_config_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("engine.json");
        tokio::fs::write(&path, r#"{"max_depth": 2}"#).await.unwrap();

        let config = EngineConfig::read(&path).await;
        assert_eq!(config.max_depth, 2);
        assert_eq!(config.step_timeout_ms, DEFAULT_STEP_TIMEOUT_MS);
    }

    #[tokio::test]
    async fn test_config_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("conf").join("engine.json");

        let config = EngineConfig::new()
            .with_max_depth(3)
            .with_step_timeout_ms(250)
            .with_pattern_dir("/srv/patterns");
        config.write(&path).await.unwrap();

        let loaded = EngineConfig::read(&path).await;
        assert_eq!(loaded, config);
    }
}
