//! Configuration management for fixpoint
//!
//! Stores settings in ~/.config/fixpoint/config.json

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_ORACLE_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on validate/fix passes per run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Diagnostics sent to the fix oracle per pass
    #[serde(default = "default_escalation_batch")]
    pub escalation_batch: usize,
    /// Characters of file content sent with each oracle request
    #[serde(default = "default_oracle_content_budget")]
    pub oracle_content_budget: usize,
    #[serde(default = "default_typecheck_timeout_secs")]
    pub typecheck_timeout_secs: u64,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    /// How long the dev server has to accept a TCP connection
    #[serde(default = "default_server_timeout_secs")]
    pub server_timeout_secs: u64,
    #[serde(default = "default_oracle_timeout_secs")]
    pub oracle_timeout_secs: u64,
    /// Delay between SIGTERM and SIGKILL
    #[serde(default = "default_kill_grace_millis")]
    pub kill_grace_millis: u64,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_port_probe_count")]
    pub port_probe_count: u16,
    #[serde(default = "default_oracle_endpoint")]
    pub oracle_endpoint: String,
    #[serde(default = "default_oracle_model")]
    pub oracle_model: String,
}

fn default_max_iterations() -> u32 {
    8
}

fn default_escalation_batch() -> usize {
    3
}

fn default_oracle_content_budget() -> usize {
    8_000
}

fn default_typecheck_timeout_secs() -> u64 {
    60
}

fn default_build_timeout_secs() -> u64 {
    120
}

fn default_test_timeout_secs() -> u64 {
    120
}

fn default_install_timeout_secs() -> u64 {
    300
}

fn default_server_timeout_secs() -> u64 {
    60
}

fn default_oracle_timeout_secs() -> u64 {
    90
}

fn default_kill_grace_millis() -> u64 {
    2_000
}

fn default_base_port() -> u16 {
    3001
}

fn default_port_probe_count() -> u16 {
    100
}

fn default_oracle_endpoint() -> String {
    DEFAULT_ORACLE_ENDPOINT.to_string()
}

fn default_oracle_model() -> String {
    "anthropic/claude-sonnet-4".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            escalation_batch: default_escalation_batch(),
            oracle_content_budget: default_oracle_content_budget(),
            typecheck_timeout_secs: default_typecheck_timeout_secs(),
            build_timeout_secs: default_build_timeout_secs(),
            test_timeout_secs: default_test_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            server_timeout_secs: default_server_timeout_secs(),
            oracle_timeout_secs: default_oracle_timeout_secs(),
            kill_grace_millis: default_kill_grace_millis(),
            base_port: default_base_port(),
            port_probe_count: default_port_probe_count(),
            oracle_endpoint: default_oracle_endpoint(),
            oracle_model: default_oracle_model(),
        }
    }
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("fixpoint"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk (or defaults), then apply environment overrides.
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Read one config file. A corrupt file is set aside and defaults are returned.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("FIXPOINT_MAX_ITERATIONS").and_then(|v| v.trim().parse().ok()) {
            self.max_iterations = v;
        }
        if let Some(v) = lookup("FIXPOINT_BASE_PORT").and_then(|v| v.trim().parse().ok()) {
            self.base_port = v;
        }
        if let Some(v) = lookup("FIXPOINT_ORACLE_MODEL").filter(|v| !v.trim().is_empty()) {
            self.oracle_model = v.trim().to_string();
        }
        if let Some(v) = lookup("FIXPOINT_ORACLE_ENDPOINT").filter(|v| !v.trim().is_empty()) {
            self.oracle_endpoint = v.trim().to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.oracle_endpoint).map_err(|e| ConfigError::Endpoint {
            endpoint: self.oracle_endpoint.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::Endpoint {
                endpoint: self.oracle_endpoint.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::Zero("max_iterations"));
        }
        if self.escalation_batch == 0 {
            return Err(ConfigError::Zero("escalation_batch"));
        }
        if self.port_probe_count == 0 {
            return Err(ConfigError::Zero("port_probe_count"));
        }
        if self.server_timeout_secs == 0 {
            return Err(ConfigError::Zero("server_timeout_secs"));
        }
        Ok(())
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        let dir = Self::config_dir().ok_or(ConfigError::NoConfigDir)?;
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(&dir.join("config.json"), &content)?;
        Ok(())
    }

    /// API key for the fix oracle, from the environment only.
    pub fn oracle_api_key() -> Option<String> {
        ["FIXPOINT_ORACLE_API_KEY", "OPENROUTER_API_KEY"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/fixpoint/config.json".to_string())
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_millis)
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.max_iterations, 8);
        assert_eq!(config.base_port, 3001);
        assert_eq!(config.oracle_content_budget, 8_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"max_iterations": 3}"#).unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.build_timeout_secs, 120);
    }

    #[test]
    fn test_corrupt_file_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.max_iterations, 8);
        assert!(dir.path().join("config.json.corrupt").exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "FIXPOINT_MAX_ITERATIONS" => Some("5".to_string()),
            "FIXPOINT_BASE_PORT" => Some("not-a-port".to_string()),
            "FIXPOINT_ORACLE_MODEL" => Some(" some/model ".to_string()),
            _ => None,
        });
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.base_port, 3001);
        assert_eq!(config.oracle_model, "some/model");
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let config = Config {
            oracle_endpoint: "ftp://example.com".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Endpoint { .. })));

        let config = Config {
            max_iterations: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Zero("max_iterations"))));
    }
}
