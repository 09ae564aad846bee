use crate::error::{BridgeError, JResult};
use chrono::Utc;
use field_tracker_rs::permission::{HostPermissions, PermissionStatus};
use field_tracker_rs::platform::{HostState, SystemClock};
use field_tracker_rs::reporter::HttpReporter;
use field_tracker_rs::sampler::{GatedSampler, LatestFixProvider};
use field_tracker_rs::store::FileStore;
use field_tracker_rs::tracking::{BackgroundTracker, IntervalScheduler};
use field_tracker_rs::{
    Collaborators, CycleOutcome, DurableQueue, Fix, SyncOrchestrator, SyncState, TrackerConfig,
    Trigger,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// One tracker per process: the async runtime plus the pipeline wired to
/// host-fed platform state.
///
/// Kotlin pushes facts in (token, connectivity, permissions, fixes,
/// battery) and calls the blocking operations from a worker thread.
pub struct TrackerSession {
    runtime: Runtime,
    host: HostState,
    permissions: HostPermissions,
    fixes: LatestFixProvider,
    queue: Arc<DurableQueue>,
    orchestrator: Arc<SyncOrchestrator>,
    tracker: BackgroundTracker,
    connected: AtomicBool,
    max_fix_age: Duration,
}

impl TrackerSession {
    /// Build the pipeline over `storage_dir`. An empty `config_json` means
    /// defaults.
    pub fn open(storage_dir: &str, config_json: &str) -> JResult<Self> {
        if storage_dir.is_empty() {
            return Err(BridgeError::InvalidParameters(
                "storage directory is empty".to_string(),
            ));
        }

        let config = if config_json.trim().is_empty() {
            TrackerConfig::default()
        } else {
            TrackerConfig::from_json_str(config_json)?
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("field-tracker")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Internal(format!("Failed to start runtime: {}", e)))?;

        let store = Arc::new(runtime.block_on(FileStore::open(storage_dir))?);
        let queue = Arc::new(DurableQueue::new(store.clone(), config.queue.max_pending));

        let host = HostState::new();
        let permissions = HostPermissions::new();
        let fixes = LatestFixProvider::new(config.max_fix_age());
        let sampler = GatedSampler::new(
            Arc::new(permissions.clone()),
            Arc::new(fixes.clone()),
            config.position_timeout(),
        );

        let orchestrator = Arc::new(SyncOrchestrator::new(
            &config,
            queue.clone(),
            Collaborators {
                sampler: Arc::new(sampler),
                reporter: Arc::new(HttpReporter::from_config(&config)?),
                tokens: Arc::new(host.clone()),
                connectivity: Arc::new(host.clone()),
                battery: Arc::new(host.clone()),
                clock: Arc::new(SystemClock),
            },
        ));

        let tracker = BackgroundTracker::new(
            Arc::new(permissions.clone()),
            Arc::new(IntervalScheduler::new(orchestrator.clone())),
            store.clone(),
            orchestrator.clone(),
            config.tracking_interval(),
        );

        log::info!("Field tracker ready, storage at {}", store.dir().display());

        Ok(TrackerSession {
            runtime,
            host,
            permissions,
            fixes,
            queue,
            orchestrator,
            tracker,
            connected: AtomicBool::new(false),
            max_fix_age: config.max_fix_age(),
        })
    }

    pub fn set_token(&self, token: Option<String>) {
        self.host.set_token(token);
    }

    /// Record network state. Going from offline to online starts a queue
    /// sync in the background.
    pub fn set_connectivity(&self, connected: bool) {
        self.host.set_connected(connected);
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);

        if connected && !was_connected {
            let orchestrator = self.orchestrator.clone();
            self.runtime.spawn(async move {
                orchestrator.handle(Trigger::ConnectivityRestored).await;
            });
        }
    }

    pub fn set_permissions(&self, foreground: bool, background: bool) {
        let status = |granted: bool| {
            if granted {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            }
        };
        self.permissions.set(status(foreground), status(background));
    }

    pub fn set_services_enabled(&self, enabled: bool) {
        self.fixes.set_services_enabled(enabled);
    }

    /// Android reports -1 when the level is unknown
    pub fn set_battery_level(&self, fraction: f64) {
        let level = if (0.0..=1.0).contains(&fraction) {
            Some(fraction)
        } else {
            None
        };
        self.host.set_battery_fraction(level);
    }

    /// Accept a platform fix. `accuracy <= 0` means unknown; a fix already
    /// older than the freshness limit is ignored.
    pub fn push_fix(
        &self,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        timestamp_secs: f64,
    ) -> JResult<()> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(BridgeError::InvalidParameters(format!(
                "coordinates out of range: {}, {}",
                latitude, longitude
            )));
        }

        if timestamp_secs > 0.0 {
            let now = Utc::now().timestamp_millis() as f64 / 1000.0;
            let age = now - timestamp_secs;
            if age > self.max_fix_age.as_secs_f64() {
                log::debug!("Ignoring stale fix ({:.0}s old)", age);
                return Ok(());
            }
        }

        let accuracy = if accuracy > 0.0 { Some(accuracy) } else { None };
        self.fixes.push_fix(Fix::new(latitude, longitude, accuracy));
        Ok(())
    }

    pub fn send_location(&self, is_real_time: bool) -> bool {
        self.runtime
            .block_on(self.orchestrator.send_location(is_real_time))
    }

    pub fn sync_queue(&self) -> CycleOutcome {
        self.runtime.block_on(self.orchestrator.sync_queue())
    }

    pub fn on_push_payload(&self, payload_json: &str, foreground: bool) -> JResult<CycleOutcome> {
        let payload: serde_json::Value = serde_json::from_str(payload_json)
            .map_err(|e| BridgeError::InvalidParameters(format!("Push payload is not JSON: {}", e)))?;
        Ok(self
            .runtime
            .block_on(self.orchestrator.handle_push(&payload, foreground)))
    }

    /// Tick from the platform work scheduler (WorkManager). Ignored while
    /// the in-process interval task is registered, so a sample is taken
    /// once per period. `None` when the tick was ignored.
    pub fn on_periodic_tick(&self) -> Option<CycleOutcome> {
        if self.is_tracking() {
            log::debug!("Interval task active, ignoring platform tick");
            return None;
        }
        Some(
            self.runtime
                .block_on(self.orchestrator.handle(Trigger::PeriodicTick)),
        )
    }

    pub fn start_tracking(&self) -> bool {
        self.runtime.block_on(self.tracker.start())
    }

    pub fn stop_tracking(&self) -> JResult<()> {
        Ok(self.runtime.block_on(self.tracker.stop())?)
    }

    pub fn is_tracking(&self) -> bool {
        self.runtime.block_on(self.tracker.is_tracking())
    }

    /// Cold start: call once token and permissions have been pushed
    pub fn resume_tracking(&self) -> bool {
        self.runtime
            .block_on(self.tracker.resume_if_active())
            .is_some()
    }

    pub fn pending_count(&self) -> JResult<usize> {
        Ok(self.runtime.block_on(self.queue.len())?)
    }

    pub fn state(&self) -> SyncState {
        self.orchestrator.state()
    }
}
