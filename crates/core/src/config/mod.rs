use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{HumSearchError, Result};

/// Base URL used when neither a config file nor the environment provides one.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Top-level configuration structure for the application.
///
/// The value is built once at start-up and handed to the components that need
/// it; nothing reads the backend location from a global.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub visualizer: VisualizerConfig,
}

impl AppConfig {
    /// Parses a TOML document. Missing sections fall back to defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Self::from_toml(&source)
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Replaces the backend base URL, e.g. from a command line flag.
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Result<Self> {
        self.backend.base_url = url.into();
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.backend.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(HumSearchError::Config(format!(
                "backend base url `{url}` must start with http:// or https://"
            )));
        }
        if self.session.max_results == Some(0) {
            return Err(HumSearchError::Config(
                "session.max_results must be at least 1".to_string(),
            ));
        }
        if self.session.auto_stop_secs == 0 {
            return Err(HumSearchError::Config(
                "session.auto_stop_secs must be at least 1".to_string(),
            ));
        }
        self.visualizer.validate()
    }
}

/// Location of the matching backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// How the results are presented. The modal variant shows a shorter list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentationMode {
    #[default]
    FullPage,
    Modal,
}

impl PresentationMode {
    /// Number of matches retained when no explicit limit is configured.
    pub fn default_max_results(self) -> usize {
        match self {
            Self::FullPage => 5,
            Self::Modal => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub presentation: PresentationMode,
    /// Overrides the presentation default when set.
    pub max_results: Option<usize>,
    pub auto_stop_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            presentation: PresentationMode::FullPage,
            max_results: None,
            auto_stop_secs: 10,
        }
    }
}

/// Parameters of the bar visualizer shown while listening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    pub bands: usize,
    pub fft_size: usize,
    /// Lowest bar height in `[0, 1]` so silent bands stay visible.
    pub min_height: f32,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            bands: 20,
            fft_size: 2048,
            min_height: 0.08,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
        }
    }
}

impl VisualizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bands == 0 {
            return Err(HumSearchError::Config("visualizer.bands must be at least 1".into()));
        }
        if self.fft_size < 2 * self.bands {
            return Err(HumSearchError::Config(format!(
                "visualizer.fft_size {} is too small for {} bands",
                self.fft_size, self.bands
            )));
        }
        if !(0.0..=1.0).contains(&self.min_height) || !(0.0..1.0).contains(&self.smoothing) {
            return Err(HumSearchError::Config(
                "visualizer.min_height must be in [0, 1] and smoothing in [0, 1)".into(),
            ));
        }
        if self.max_db <= self.min_db {
            return Err(HumSearchError::Config(
                "visualizer.max_db must exceed min_db".into(),
            ));
        }
        Ok(())
    }
}
