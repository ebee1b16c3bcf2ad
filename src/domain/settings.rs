use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use super::AppError;

/// User-tunable settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub concurrent_downloads: usize,
    /// Longest a transfer may go without receiving data.
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub probe_concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            concurrent_downloads: 3,
            timeout_secs: 30,
            probe_timeout_secs: 10,
            probe_concurrency: 8,
        }
    }
}

impl Settings {
    /// Reads `path` if it exists, falling back to defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let json = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let settings: Settings = serde_json::from_str(json)
            .map_err(|e| AppError::Config(format!("Malformed settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrent_downloads == 0 {
            return Err(AppError::Config(
                "concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.probe_concurrency == 0 {
            return Err(AppError::Config(
                "probe_concurrency must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(AppError::Config("timeouts must be positive".to_string()));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(AppError::Config("download_dir is empty".to_string()));
        }
        Ok(())
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("downloads"))
        .join("SoftwareBundle")
}
