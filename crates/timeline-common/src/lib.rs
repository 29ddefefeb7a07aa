pub type Result<T> = core::result::Result<T, TimelineError>;

#[derive(thiserror::Error, Debug)]
pub enum TimelineError {
    /// Caller supplied something the decoder refuses to run with.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("vocabulary error: {0}")]
    Vocabulary(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl TimelineError {
    pub fn invalid(msg: impl Into<String>) -> Self { Self::InvalidInput(msg.into()) }
    pub fn inference(msg: impl Into<String>) -> Self { Self::Inference(msg.into()) }

    /// True when the failure is the caller's fault rather than the model's.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

pub mod config {
    use crate::{Result, TimelineError};
    use serde::Deserialize;
    use std::env;
    use std::path::PathBuf;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct TimelineConfig {
        pub vocab_path: PathBuf,
        pub model_path: Option<PathBuf>,
        pub max_sequence_len: usize,
        pub default_max_events: usize,
        pub default_temperature: f64,
        pub terminal_marker: String,
        pub bind: String,
    }

    impl Default for TimelineConfig {
        fn default() -> Self {
            Self {
                vocab_path: PathBuf::from("processed_data/tokenizer.json"),
                model_path: None,
                max_sequence_len: 100,
                default_max_events: 15,
                default_temperature: 1.0,
                terminal_marker: String::from("discharge"),
                bind: String::from("0.0.0.0:5001"),
            }
        }
    }

    impl TimelineConfig {
        /// Reads `TIMELINE_CONFIG` as YAML when set, otherwise defaults plus env overrides.
        pub fn load() -> Result<Self> {
            if let Ok(path) = env::var("TIMELINE_CONFIG") {
                return Self::from_file(path);
            }
            let mut cfg = Self::default();
            if let Ok(path) = env::var("TIMELINE_VOCAB") { cfg.vocab_path = PathBuf::from(path); }
            if let Ok(path) = env::var("TIMELINE_MODEL") { cfg.model_path = Some(PathBuf::from(path)); }
            if let Some(v) = env::var("TIMELINE_MAX_SEQ_LEN").ok().and_then(|v| v.parse().ok()) { cfg.max_sequence_len = v; }
            if let Some(v) = env::var("TIMELINE_MAX_EVENTS").ok().and_then(|v| v.parse().ok()) { cfg.default_max_events = v; }
            if let Some(v) = env::var("TIMELINE_TEMPERATURE").ok().and_then(|v| v.parse().ok()) { cfg.default_temperature = v; }
            if let Ok(v) = env::var("TIMELINE_TERMINAL") { cfg.terminal_marker = v; }
            if let Ok(v) = env::var("TIMELINE_BIND") { cfg.bind = v; }
            cfg.validate()?;
            Ok(cfg)
        }

        pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
            let text = std::fs::read_to_string(path)?;
            Self::from_yaml(&text)
        }

        pub fn from_yaml(text: &str) -> Result<Self> {
            let cfg = serde_yaml::from_str::<TimelineConfig>(text)?;
            cfg.validate()?;
            Ok(cfg)
        }

        pub fn validate(&self) -> Result<()> {
            if self.max_sequence_len < 2 {
                return Err(TimelineError::Config(format!(
                    "max_sequence_len must be at least 2, got {}",
                    self.max_sequence_len
                )));
            }
            if self.default_max_events == 0 {
                return Err(TimelineError::Config("default_max_events must be positive".into()));
            }
            if !(self.default_temperature.is_finite() && self.default_temperature > 0.0) {
                return Err(TimelineError::Config(format!(
                    "default_temperature must be positive, got {}",
                    self.default_temperature
                )));
            }
            if self.terminal_marker.is_empty() {
                return Err(TimelineError::Config("terminal_marker must not be empty".into()));
            }
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_invalid_input_is_client_error() {
        assert!(TimelineError::invalid("temperature").is_client_error());
        assert!(!TimelineError::inference("boom").is_client_error());
        assert!(!TimelineError::Model("shape".into()).is_client_error());
    }
}
