use crate::error::{TrackerError, TrackerResult};
use crate::orchestrator::{CycleOutcome, SyncOrchestrator};
use crate::permission::{ensure_background_permission, PermissionGate};
use crate::store::KeyValueStore;
use crate::trigger::Trigger;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Storage key set while background tracking is on
pub const TRACKING_FLAG_KEY: &str = "tracking_active";

/// Periodic background work registration
#[async_trait]
pub trait TaskScheduler: Send + Sync {
    /// Start ticking every `interval`. Registering twice is a no-op.
    async fn register(&self, interval: Duration) -> TrackerResult<()>;
    async fn cancel(&self) -> TrackerResult<()>;
    async fn is_registered(&self) -> bool;
}

/// Tokio task that fires a periodic cycle on the orchestrator
pub struct IntervalScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl IntervalScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            orchestrator,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TaskScheduler for IntervalScheduler {
    async fn register(&self, interval: Duration) -> TrackerResult<()> {
        if interval.is_zero() {
            return Err(TrackerError::RegistrationFailed(
                "interval must be non-zero".to_string(),
            ));
        }

        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| TrackerError::RegistrationFailed(format!("No async runtime: {}", e)))?;

        let mut task = self
            .task
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire scheduler lock".to_string()))?;

        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            log::debug!("Periodic task already registered");
            return Ok(());
        }

        let orchestrator = self.orchestrator.clone();
        *task = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                orchestrator.handle(Trigger::PeriodicTick).await;
            }
        }));

        log::info!("Periodic location task registered every {}s", interval.as_secs());
        Ok(())
    }

    async fn cancel(&self) -> TrackerResult<()> {
        let mut task = self
            .task
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire scheduler lock".to_string()))?;
        if let Some(handle) = task.take() {
            handle.abort();
            log::info!("Periodic location task cancelled");
        }
        Ok(())
    }

    async fn is_registered(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().map_or(false, |h| !h.is_finished()))
            .unwrap_or(false)
    }
}

/// Start/stop surface for background tracking.
///
/// The on/off choice is persisted under [`TRACKING_FLAG_KEY`] so a cold
/// start can pick tracking back up with [`BackgroundTracker::resume_if_active`].
pub struct BackgroundTracker {
    gate: Arc<dyn PermissionGate>,
    scheduler: Arc<dyn TaskScheduler>,
    store: Arc<dyn KeyValueStore>,
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
}

impl BackgroundTracker {
    pub fn new(
        gate: Arc<dyn PermissionGate>,
        scheduler: Arc<dyn TaskScheduler>,
        store: Arc<dyn KeyValueStore>,
        orchestrator: Arc<SyncOrchestrator>,
        interval: Duration,
    ) -> Self {
        Self {
            gate,
            scheduler,
            store,
            orchestrator,
            interval,
        }
    }

    /// Returns false if background permission is missing or registration
    /// fails. Calling it while already tracking is harmless.
    pub async fn start(&self) -> bool {
        if !ensure_background_permission(self.gate.as_ref()).await {
            log::warn!("Background location permission not granted, tracking not started");
            return false;
        }

        if let Err(e) = self.scheduler.register(self.interval).await {
            log::error!("Failed to register background tracking: {}", e);
            return false;
        }

        if let Err(e) = self.store.set(TRACKING_FLAG_KEY, "true").await {
            log::warn!("Tracking started but not persisted, it won't resume after restart: {}", e);
        }
        true
    }

    pub async fn stop(&self) -> TrackerResult<()> {
        self.scheduler.cancel().await?;
        self.store.remove(TRACKING_FLAG_KEY).await
    }

    pub async fn is_tracking(&self) -> bool {
        self.scheduler.is_registered().await
    }

    /// Cold start: re-register and run one cycle if tracking was left on.
    /// Returns the cycle outcome, or `None` if nothing was resumed.
    pub async fn resume_if_active(&self) -> Option<CycleOutcome> {
        match self.store.get(TRACKING_FLAG_KEY).await {
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Could not read tracking flag: {}", e);
                return None;
            }
        }

        if !ensure_background_permission(self.gate.as_ref()).await {
            log::warn!("Background permission revoked since last run, tracking stays off");
            if let Err(e) = self.store.remove(TRACKING_FLAG_KEY).await {
                log::warn!("Could not clear tracking flag: {}", e);
            }
            return None;
        }

        if let Err(e) = self.scheduler.register(self.interval).await {
            log::error!("Failed to resume background tracking: {}", e);
            return None;
        }

        Some(self.orchestrator.handle(Trigger::ColdStartResume).await)
    }
}
