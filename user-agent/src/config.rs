// user-agent/src/config.rs
// Configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shield_kernel::EbpfConfig;
use tracing::warn;

pub const DEFAULT_ENTROPY_THRESHOLD: f64 = 7.5;
pub const DEFAULT_ALLOW_LIST: &[&str] = &["zip", "gzip", "scp"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionConfig,
    pub response: ResponseConfig,
    pub ebpf: EbpfConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Samples strictly above this Shannon entropy (bits/byte) are suspicious
    pub entropy_threshold: f64,
    /// Process names exempt from enforcement
    pub allow_list: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            entropy_threshold: DEFAULT_ENTROPY_THRESHOLD,
            allow_list: DEFAULT_ALLOW_LIST.iter().map(|name| name.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// When false, detections are logged but no signal is sent
    pub enable_process_kill: bool,
    /// Append one JSON line per detection to this file
    pub incident_log: Option<String>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            enable_process_kill: true,
            incident_log: None,
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults; a file that
    /// exists but does not parse is an error.
    pub fn load(path: &str) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content)
                .with_context(|| format!("failed to parse config file {}", path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Config file {} not found, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed to read config file {}", path)),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.detection.entropy_threshold;
        if !threshold.is_finite() || !(0.0..=8.0).contains(&threshold) {
            anyhow::bail!(
                "detection.entropy_threshold must be within [0, 8], got {}",
                threshold
            );
        }
        self.ebpf.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.detection.entropy_threshold, 7.5);
        assert_eq!(config.detection.allow_list, vec!["zip", "gzip", "scp"]);
        assert!(config.response.enable_process_kill);
        assert!(config.response.incident_log.is_none());
        assert_eq!(config.ebpf.sample_len, 128);
        assert_ok!(config.validate());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [detection]
            allow_list = ["zstd", "rsync"]

            [ebpf]
            sample_len = 256
            "#,
        )
        .unwrap();

        assert_eq!(config.detection.entropy_threshold, 7.5);
        assert_eq!(config.detection.allow_list, vec!["zstd", "rsync"]);
        assert_eq!(config.ebpf.sample_len, 256);
        assert_eq!(config.ebpf.program_name, "trace_write");
        assert!(config.response.enable_process_kill);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let mut config = Config::default();
        config.detection.entropy_threshold = 9.0;
        assert_err!(config.validate());

        config.detection.entropy_threshold = f64::NAN;
        assert_err!(config.validate());

        let mut config = Config::default();
        config.ebpf.sample_len = 0;
        assert_err!(config.validate());
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        assert_err!(Config::from_toml("detection = ["));
        assert_err!(Config::from_toml("[detection]\nentropy_threshold = \"high\""));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/entropy-shield.toml").unwrap();
        assert_eq!(config.detection.entropy_threshold, DEFAULT_ENTROPY_THRESHOLD);
    }
}
