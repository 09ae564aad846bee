use crate::error::{TrackerError, TrackerResult};
use chrono::Timelike;
use serde::{Deserialize, Serialize};

/// Local-time window in which routine background samples are taken.
///
/// Hours are whole local hours: `start_hour` is inclusive, `end_hour`
/// exclusive. A window with `start_hour > end_hour` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl ReportingWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> TrackerResult<Self> {
        let window = Self {
            start_hour,
            end_hour,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.start_hour > 23 || self.end_hour > 24 {
            return Err(TrackerError::Config(format!(
                "Reporting window hours out of range: {}..{}",
                self.start_hour, self.end_hour
            )));
        }
        if self.start_hour == self.end_hour {
            return Err(TrackerError::Config(
                "Reporting window is empty (start_hour == end_hour)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn contains<T: Timelike>(&self, local_time: &T) -> bool {
        let hour = local_time.hour();
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl Default for ReportingWindow {
    fn default() -> Self {
        Self {
            start_hour: 9,
            end_hour: 21,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_default_window_boundaries() {
        let window = ReportingWindow::default();
        assert!(!window.contains(&at(8, 59)));
        assert!(window.contains(&at(9, 0)));
        assert!(window.contains(&at(20, 59)));
        assert!(!window.contains(&at(21, 0)));
        assert!(!window.contains(&at(23, 0)));
    }

    #[test]
    fn test_overnight_window() {
        let window = ReportingWindow::new(22, 6).unwrap();
        assert!(window.contains(&at(23, 30)));
        assert!(window.contains(&at(2, 0)));
        assert!(!window.contains(&at(12, 0)));
    }

    #[test]
    fn test_full_day_window() {
        let window = ReportingWindow::new(0, 24).unwrap();
        assert!(window.contains(&at(0, 0)));
        assert!(window.contains(&at(23, 59)));
    }

    #[test]
    fn test_invalid_windows() {
        assert!(ReportingWindow::new(9, 9).is_err());
        assert!(ReportingWindow::new(24, 3).is_err());
        assert!(ReportingWindow::new(3, 25).is_err());
    }
}
