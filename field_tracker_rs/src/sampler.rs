use crate::error::{TrackerError, TrackerResult};
use crate::permission::{ensure_foreground_permission, PermissionGate};
use crate::sample::{Fix, Precision};
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Raw platform location API
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// Whether the device location service (GPS toggle) is on
    async fn services_enabled(&self) -> bool;

    /// One-shot position read. May take several seconds.
    async fn current_position(&self, precision: Precision) -> TrackerResult<Fix>;
}

/// Source of position readings for the orchestrator
#[async_trait]
pub trait PositionSampler: Send + Sync {
    async fn get_current_position(&self, precision: Precision) -> TrackerResult<Fix>;
}

/// Permission check, then service check, then a time-bounded platform read.
pub struct GatedSampler {
    gate: Arc<dyn PermissionGate>,
    provider: Arc<dyn LocationProvider>,
    timeout: Duration,
}

impl GatedSampler {
    pub fn new(
        gate: Arc<dyn PermissionGate>,
        provider: Arc<dyn LocationProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            gate,
            provider,
            timeout,
        }
    }
}

#[async_trait]
impl PositionSampler for GatedSampler {
    async fn get_current_position(&self, precision: Precision) -> TrackerResult<Fix> {
        if !ensure_foreground_permission(self.gate.as_ref()).await {
            return Err(TrackerError::PermissionDenied);
        }

        if !self.provider.services_enabled().await {
            return Err(TrackerError::PositionUnavailable(
                "location services disabled".to_string(),
            ));
        }

        match tokio::time::timeout(self.timeout, self.provider.current_position(precision)).await {
            Ok(result) => result,
            Err(_) => Err(TrackerError::PositionUnavailable(format!(
                "no fix within {:.0}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PushedFix {
    fix: Fix,
    received: Instant,
}

/// Location provider fed by the host: the platform delivers fixes through its
/// own callbacks and the latest one is served if it is fresh enough.
#[derive(Debug, Clone)]
pub struct LatestFixProvider {
    latest: Arc<RwLock<Option<PushedFix>>>,
    services_enabled: Arc<RwLock<bool>>,
    max_age: Duration,
}

impl LatestFixProvider {
    pub fn new(max_age: Duration) -> Self {
        Self {
            latest: Arc::new(RwLock::new(None)),
            services_enabled: Arc::new(RwLock::new(true)),
            max_age,
        }
    }

    pub fn push_fix(&self, fix: Fix) {
        if let Ok(mut latest) = self.latest.write() {
            *latest = Some(PushedFix {
                fix,
                received: Instant::now(),
            });
        }
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        if let Ok(mut flag) = self.services_enabled.write() {
            *flag = enabled;
        }
    }
}

#[async_trait]
impl LocationProvider for LatestFixProvider {
    async fn services_enabled(&self) -> bool {
        self.services_enabled.read().map(|f| *f).unwrap_or(false)
    }

    async fn current_position(&self, _precision: Precision) -> TrackerResult<Fix> {
        let latest = self
            .latest
            .read()
            .map_err(|_| TrackerError::Internal("Failed to acquire fix lock".to_string()))?;

        match *latest {
            Some(pushed) if pushed.received.elapsed() <= self.max_age => Ok(pushed.fix),
            Some(pushed) => Err(TrackerError::PositionUnavailable(format!(
                "latest fix is {:.0}s old",
                pushed.received.elapsed().as_secs_f64()
            ))),
            None => Err(TrackerError::PositionUnavailable(
                "no fix received yet".to_string(),
            )),
        }
    }
}
