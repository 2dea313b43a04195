use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub render: RenderConfig,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_mode")]
    pub mode: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_source_fps")]
    pub fps: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_render_fps")]
    pub fps: f64,
    /// Upper bound on how long a single inference may hold the gate. 0 disables.
    #[serde(default = "default_inference_timeout")]
    pub inference_timeout_secs: u64,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub model_url: Option<String>,
    #[serde(default = "default_model_file")]
    pub model_file: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: default_render_fps(),
            inference_timeout_secs: default_inference_timeout(),
            snapshot_path: default_snapshot_path(),
            snapshot_every: default_snapshot_every(),
        }
    }
}

impl RenderConfig {
    pub fn inference_timeout(&self) -> Option<Duration> {
        (self.inference_timeout_secs > 0).then(|| Duration::from_secs(self.inference_timeout_secs))
    }
}

impl DetectorConfig {
    pub fn model_path(&self) -> PathBuf {
        self.cache_dir.join(&self.model_file)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.render.fps > 0.0) {
            return Err(ConfigError::Invalid("render.fps must be positive".into()));
        }
        if !(self.source.fps > 0.0) {
            return Err(ConfigError::Invalid("source.fps must be positive".into()));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(ConfigError::Invalid(
                "source.width and source.height must be non-zero".into(),
            ));
        }
        match self.source.mode.as_str() {
            "pattern" => Ok(()),
            "http" if self.source.url.is_empty() => Err(ConfigError::Invalid(
                "source.url is required when source.mode = \"http\"".into(),
            )),
            "http" => Ok(()),
            other => Err(ConfigError::Invalid(format!(
                "unknown source.mode '{other}', expected 'pattern' or 'http'"
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_source_mode() -> String {
    "pattern".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_source_fps() -> f64 {
    30.0
}
fn default_render_fps() -> f64 {
    60.0
}
fn default_inference_timeout() -> u64 {
    10
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("overlay.png")
}
fn default_snapshot_every() -> u64 {
    30
}
fn default_model_file() -> String {
    "detr-resnet-50.onnx".into()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("models")
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [source]
        [detector]
        command = "detector-server"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.source.mode, "pattern");
        assert_eq!((config.source.width, config.source.height), (640, 480));
        assert_eq!(config.render.fps, 60.0);
        assert_eq!(config.render.inference_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.detector.model_path(),
            PathBuf::from("models").join("detr-resnet-50.onnx")
        );
    }

    #[test]
    fn zero_timeout_disables_watchdog() {
        let toml = format!("{MINIMAL}\n[render]\ninference_timeout_secs = 0\n");
        let config = Config::from_toml(&toml).unwrap();
        assert_eq!(config.render.inference_timeout(), None);
    }

    #[test]
    fn http_source_requires_url() {
        let toml = r#"
            [source]
            mode = "http"
            [detector]
            command = "detector-server"
        "#;
        assert!(matches!(Config::from_toml(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_mode_rejected() {
        let toml = r#"
            [source]
            mode = "webrtc"
            [detector]
            command = "detector-server"
        "#;
        assert!(matches!(Config::from_toml(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_detector_is_parse_error() {
        assert!(matches!(
            Config::from_toml("[source]\n"),
            Err(ConfigError::Parse(_))
        ));
    }
}
