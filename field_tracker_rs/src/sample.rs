use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Requested accuracy for a one-shot position read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// GPS-grade fix, used for on-demand reports
    High,
    /// Network/WiFi-assisted fix, used for routine background reports
    Balanced,
}

/// Coordinates returned by the platform location API
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, if the platform knows it
    pub accuracy: Option<f64>,
}

impl Fix {
    pub fn new(latitude: f64, longitude: f64, accuracy: Option<f64>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
        }
    }
}

/// One observation to report to the backend.
///
/// `recorded_at` is fixed at capture time and has no setter, so queued
/// samples keep the time they were taken rather than the time they were sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub battery_level_percent: u8,
    pub is_real_time: bool,
    recorded_at: DateTime<Utc>,
}

impl LocationSample {
    pub fn new(
        fix: Fix,
        battery_level_percent: u8,
        is_real_time: bool,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            battery_level_percent: battery_level_percent.min(100),
            is_real_time,
            recorded_at,
        }
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }
}

/// Convert a platform battery fraction (0.0-1.0) to a whole percentage.
/// Unknown or nonsensical readings report 0.
pub fn battery_percent(fraction: Option<f64>) -> u8 {
    match fraction {
        Some(f) if f.is_finite() && f >= 0.0 => (f * 100.0).round().min(100.0) as u8,
        _ => 0,
    }
}
