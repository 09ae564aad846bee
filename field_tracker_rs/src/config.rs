use crate::error::{TrackerError, TrackerResult};
use crate::window::ReportingWindow;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How queued samples are put on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Batch endpoint for several samples, single endpoint for a lone one
    Auto,
    /// Every sample goes to the single endpoint, one request each, in order
    Single,
}

/// Backend endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Path for one sample per request
    pub location_path: String,
    /// Path for `{locations: [...]}` batches
    pub batch_path: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://donoxonsi.uz".to_string(),
            location_path: "/api/location".to_string(),
            batch_path: "/api/location/batch".to_string(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Upper bound on a single platform position read
    pub position_timeout_secs: u64,
    /// Oldest host-pushed fix that still counts as the current position
    pub max_fix_age_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            position_timeout_secs: 20,
            max_fix_age_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Cap on undelivered samples; the oldest are dropped beyond it
    pub max_pending: usize,
    /// Samples per delivery request
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: 5000,
            batch_size: 50,
        }
    }
}

/// Tracker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub api: ApiConfig,
    pub sampling: SamplingConfig,
    pub queue: QueueConfig,
    pub reporting_window: ReportingWindow,
    /// Period of the background sampling task
    pub tracking_interval_secs: u64,
    pub submit_mode: SubmitMode,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            sampling: SamplingConfig::default(),
            queue: QueueConfig::default(),
            reporting_window: ReportingWindow::default(),
            tracking_interval_secs: 60 * 60,
            submit_mode: SubmitMode::Auto,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> TrackerResult<Self> {
        let config: TrackerConfig = serde_json::from_str(json)
            .map_err(|e| TrackerError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            TrackerError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        let url = self.api.base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(TrackerError::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        for (name, path) in [
            ("api.location_path", &self.api.location_path),
            ("api.batch_path", &self.api.batch_path),
        ] {
            if !path.starts_with('/') {
                return Err(TrackerError::Config(format!("{} must start with '/'", name)));
            }
        }
        if self.api.request_timeout_secs == 0 {
            return Err(TrackerError::Config("api.request_timeout_secs must be > 0".to_string()));
        }
        if self.sampling.position_timeout_secs == 0 {
            return Err(TrackerError::Config(
                "sampling.position_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.queue.batch_size == 0 || self.queue.max_pending == 0 {
            return Err(TrackerError::Config(
                "queue.batch_size and queue.max_pending must be > 0".to_string(),
            ));
        }
        if self.tracking_interval_secs < 60 {
            return Err(TrackerError::Config(
                "tracking_interval_secs must be at least 60".to_string(),
            ));
        }
        self.reporting_window.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.request_timeout_secs)
    }

    pub fn position_timeout(&self) -> Duration {
        Duration::from_secs(self.sampling.position_timeout_secs)
    }

    pub fn max_fix_age(&self) -> Duration {
        Duration::from_secs(self.sampling.max_fix_age_secs)
    }

    pub fn tracking_interval(&self) -> Duration {
        Duration::from_secs(self.tracking_interval_secs)
    }
}
