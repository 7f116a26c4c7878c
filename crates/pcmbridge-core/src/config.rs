//! Bridge configuration.
//!
//! Loaded once at startup from a JSON file. Every field has a default, so an
//! absent or partial file is fine.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{DecoderCapabilities, Error, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PCMBRIDGE_CONFIG";

/// Which sink the streaming player opens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Default hardware output through cpal.
    #[default]
    Cpal,
    /// Real-time clocked software sink, no hardware needed.
    Virtual,
}

/// Streaming-domain tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamingConfig {
    /// How long the consumer waits on an empty queue before re-checking stop.
    pub poll_timeout_ms: u64,
    /// Position report period.
    pub progress_interval_ms: u64,
    /// Audio duration used to size the device buffer.
    pub buffer_duration_ms: u64,
}

impl StreamingConfig {
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub const fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub const fn buffer_duration(&self) -> Duration {
        Duration::from_millis(self.buffer_duration_ms)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 200,
            progress_interval_ms: 200,
            buffer_duration_ms: 250,
        }
    }
}

/// File-playback tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    /// Initial progress-timer period.
    pub subscription_duration_ms: u64,
}

impl FileConfig {
    pub const fn subscription_duration(&self) -> Duration {
        Duration::from_millis(self.subscription_duration_ms)
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            subscription_duration_ms: 10,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub streaming: StreamingConfig,
    pub file: FileConfig,
    pub output: OutputKind,
    /// Platform version used to gate codec capabilities.
    pub platform_version: Option<u32>,
    /// Tracing filter directive, overridden by `RUST_LOG`.
    pub log_filter: Option<String>,
}

impl BridgeConfig {
    /// Parse a config from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_json(&text)
    }

    /// Pick the config file: an explicit path, then `PCMBRIDGE_CONFIG`, then
    /// the per-user config directory if the file exists there.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .or_else(|| Self::default_path().filter(|p| p.exists()))
    }

    /// Read `source`, or use defaults when there is none.
    pub fn load(source: Option<&Path>) -> Result<Self> {
        source.map_or_else(|| Ok(Self::default()), Self::from_path)
    }

    /// `config.json` inside the per-user config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "pcmbridge", "pcmbridge")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }

    pub const fn capabilities(&self) -> DecoderCapabilities {
        DecoderCapabilities::new(self.platform_version)
    }

    fn validate(&self) -> Result<()> {
        if self.streaming.poll_timeout_ms == 0 {
            return Err(Error::Config("streaming.poll_timeout_ms must be positive".into()));
        }
        if self.streaming.progress_interval_ms == 0 {
            return Err(Error::Config(
                "streaming.progress_interval_ms must be positive".into(),
            ));
        }
        if self.file.subscription_duration_ms == 0 {
            return Err(Error::Config(
                "file.subscription_duration_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.streaming.poll_timeout(), Duration::from_millis(200));
        assert_eq!(config.streaming.progress_interval(), Duration::from_millis(200));
        assert_eq!(config.file.subscription_duration(), Duration::from_millis(10));
        assert_eq!(config.output, OutputKind::Cpal);
    }

    #[test]
    fn test_partial_json() {
        let config =
            BridgeConfig::from_json(r#"{"output":"virtual","streaming":{"buffer_duration_ms":500}}"#)
                .unwrap();
        assert_eq!(config.output, OutputKind::Virtual);
        assert_eq!(config.streaming.buffer_duration_ms, 500);
        assert_eq!(config.streaming.poll_timeout_ms, 200);
    }

    #[test]
    fn test_rejects_zero_period() {
        let err = BridgeConfig::from_json(r#"{"file":{"subscription_duration_ms":0}}"#);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"platform_version":21}}"#).unwrap();

        let config = BridgeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.platform_version, Some(21));
        assert!(!config.capabilities().is_supported(5));
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Path::new("/tmp/pcmbridge-explicit.json");
        assert_eq!(BridgeConfig::locate(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn test_no_source_uses_defaults() {
        assert_eq!(BridgeConfig::load(None).unwrap(), BridgeConfig::default());
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeConfig::load(Some(&dir.path().join("nope.json")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
