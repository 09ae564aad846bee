use crate::config::{SubmitMode, TrackerConfig};
use crate::error::TrackerError;
use crate::platform::{BatterySource, Clock, Connectivity, TokenSource};
use crate::queue::DurableQueue;
use crate::reporter::{NetworkReporter, ReportOutcome};
use crate::sample::{battery_percent, LocationSample, Precision};
use crate::sampler::PositionSampler;
use crate::trigger::{parse_push_payload, Trigger};
use crate::window::ReportingWindow;
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex};

/// Orchestrator state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    /// Waiting on the platform for a position
    Sampling,
    /// Offline; storing the sample for later
    Queuing,
    /// Delivering queued samples
    Reporting,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Routine trigger outside the reporting window
    OutsideWindow,
    NoToken,
    /// Sampler failed (permission, GPS off, timeout)
    NoFix(TrackerError),
    Offline,
    NothingPending,
    /// Push payload not addressed to location reporting
    UnrelatedPush,
}

/// Result of one orchestrator cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Everything pending, including any new sample, reached the backend
    Delivered { count: usize },
    /// Offline; the new sample is stored durably
    Queued { pending: usize },
    /// Delivery stopped on a retryable failure; samples stay queued
    Deferred {
        delivered: usize,
        pending: usize,
        reason: TrackerError,
    },
    /// Samples discarded for good
    Dropped { count: usize, reason: TrackerError },
    Skipped(SkipReason),
    /// Another flush holds the single-flight lock
    AlreadyRunning,
}

impl CycleOutcome {
    /// The new sample was delivered or is safely queued
    pub fn sample_accepted(&self) -> bool {
        matches!(
            self,
            CycleOutcome::Delivered { .. }
                | CycleOutcome::Queued { .. }
                | CycleOutcome::Deferred { .. }
        )
    }
}

impl Display for CycleOutcome {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CycleOutcome::Delivered { count } => write!(f, "delivered {} sample(s)", count),
            CycleOutcome::Queued { pending } => write!(f, "queued ({} pending)", pending),
            CycleOutcome::Deferred {
                delivered,
                pending,
                reason,
            } => write!(
                f,
                "deferred after {} delivered, {} pending: {}",
                delivered, pending, reason
            ),
            CycleOutcome::Dropped { count, reason } => {
                write!(f, "dropped {} sample(s): {}", count, reason)
            }
            CycleOutcome::Skipped(reason) => write!(f, "skipped: {:?}", reason),
            CycleOutcome::AlreadyRunning => write!(f, "flush already running"),
        }
    }
}

/// Everything the orchestrator consumes from the platform
pub struct Collaborators {
    pub sampler: Arc<dyn PositionSampler>,
    pub reporter: Arc<dyn NetworkReporter>,
    pub tokens: Arc<dyn TokenSource>,
    pub connectivity: Arc<dyn Connectivity>,
    pub battery: Arc<dyn BatterySource>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy)]
struct CyclePlan {
    on_demand: bool,
    real_time: bool,
    interactive: bool,
    label: &'static str,
}

impl From<Trigger> for CyclePlan {
    fn from(trigger: Trigger) -> Self {
        CyclePlan {
            on_demand: trigger.is_on_demand(),
            real_time: trigger.is_real_time(),
            interactive: trigger.is_interactive(),
            label: trigger.label(),
        }
    }
}

/// Single entry point for every trigger.
///
/// # Ordering
/// New samples are appended to the durable queue behind older ones before
/// anything is sent, and the queue is delivered front to back, so the
/// backend sees samples in capture order.
///
/// # Single flight
/// Drain, send and acknowledge run under `flush_lock`. Sampling triggers
/// wait for it; `sync_queue` gives up immediately if a flush is running,
/// since that flush will pick up the same samples.
pub struct SyncOrchestrator {
    queue: Arc<DurableQueue>,
    deps: Collaborators,
    window: ReportingWindow,
    batch_size: usize,
    submit_mode: SubmitMode,
    flush_lock: tokio::sync::Mutex<()>,
    state: Mutex<SyncState>,
}

impl SyncOrchestrator {
    pub fn new(config: &TrackerConfig, queue: Arc<DurableQueue>, deps: Collaborators) -> Self {
        SyncOrchestrator {
            queue,
            deps,
            window: config.reporting_window,
            batch_size: config.queue.batch_size.max(1),
            submit_mode: config.submit_mode,
            flush_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    pub fn state(&self) -> SyncState {
        self.state.lock().map(|s| *s).unwrap_or(SyncState::Idle)
    }

    fn set_state(&self, state: SyncState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    /// Run one cycle for `trigger`
    pub async fn handle(&self, trigger: Trigger) -> CycleOutcome {
        if !trigger.samples_position() {
            return self.sync_queue().await;
        }
        self.sampling_cycle(CyclePlan::from(trigger)).await
    }

    /// Report from the app. A real-time report is on-demand and ignores the
    /// reporting window; a routine one is skipped outside it. True if the
    /// sample was delivered or stored for delivery.
    pub async fn send_location(&self, is_real_time: bool) -> bool {
        let plan = CyclePlan {
            on_demand: is_real_time,
            real_time: is_real_time,
            interactive: true,
            label: "send_location",
        };
        self.sampling_cycle(plan).await.sample_accepted()
    }

    /// Dispatch a push notification payload
    pub async fn handle_push(&self, payload: &Value, foreground: bool) -> CycleOutcome {
        match parse_push_payload(payload) {
            Some(kind) => self.handle(Trigger::Push { kind, foreground }).await,
            None => CycleOutcome::Skipped(SkipReason::UnrelatedPush),
        }
    }

    /// Flush the queue without sampling (connectivity restored)
    pub async fn sync_queue(&self) -> CycleOutcome {
        if !self.deps.connectivity.is_connected().await {
            return CycleOutcome::Skipped(SkipReason::Offline);
        }

        let _flight = match self.flush_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("Queue sync requested while a flush is running");
                return CycleOutcome::AlreadyRunning;
            }
        };

        self.set_state(SyncState::Reporting);
        let outcome = self.flush_locked(None).await;
        self.set_state(SyncState::Idle);

        log::info!("[connectivity] {}", outcome);
        outcome
    }

    async fn sampling_cycle(&self, plan: CyclePlan) -> CycleOutcome {
        if !plan.on_demand {
            let local = self.deps.clock.local_now();
            if !self.window.contains(&local) {
                log::debug!(
                    "[{}] {} is outside the {:02}:00-{:02}:00 window, not sampling",
                    plan.label,
                    local.format("%H:%M"),
                    self.window.start_hour,
                    self.window.end_hour
                );
                return CycleOutcome::Skipped(SkipReason::OutsideWindow);
            }
        }

        if self.deps.tokens.token().await.is_none() {
            log::warn!("[{}] No auth token, location not reported", plan.label);
            return CycleOutcome::Skipped(SkipReason::NoToken);
        }

        self.set_state(SyncState::Sampling);
        let precision = if plan.on_demand {
            Precision::High
        } else {
            Precision::Balanced
        };

        let fix = match self.deps.sampler.get_current_position(precision).await {
            Ok(fix) => fix,
            Err(e) => {
                self.set_state(SyncState::Idle);
                if plan.interactive {
                    log::warn!("[{}] Could not get position: {}", plan.label, e);
                } else {
                    log::info!("[{}] No position this cycle: {}", plan.label, e);
                }
                return CycleOutcome::Skipped(SkipReason::NoFix(e));
            }
        };

        let battery = battery_percent(self.deps.battery.battery_fraction().await);
        let sample = LocationSample::new(fix, battery, plan.real_time, self.deps.clock.now());

        let outcome = self.dispatch(sample).await;
        self.set_state(SyncState::Idle);

        log::info!("[{}] {}", plan.label, outcome);
        outcome
    }

    async fn dispatch(&self, sample: LocationSample) -> CycleOutcome {
        if !self.deps.connectivity.is_connected().await {
            self.set_state(SyncState::Queuing);
            return match self.queue.enqueue(sample).await {
                Ok(report) => CycleOutcome::Queued {
                    pending: report.pending,
                },
                Err(e) => {
                    log::error!("Offline and could not store sample, it is lost: {}", e);
                    CycleOutcome::Dropped {
                        count: 1,
                        reason: e,
                    }
                }
            };
        }

        let _flight = self.flush_lock.lock().await;
        self.set_state(SyncState::Reporting);

        let spill = match self.queue.enqueue(sample.clone()).await {
            Ok(_) => None,
            Err(e) => {
                log::error!("Could not store sample, sending it from memory this cycle: {}", e);
                Some(sample)
            }
        };

        self.flush_locked(spill).await
    }

    async fn deliver(&self, batch: &[LocationSample], token: &str) -> ReportOutcome {
        if batch.len() == 1 {
            self.deps.reporter.report_one(&batch[0], token).await
        } else {
            self.deps.reporter.report_batch(batch, token).await
        }
    }

    /// Deliver the queue front to back. Caller holds `flush_lock`.
    ///
    /// `spill` is a sample that could not be persisted; it rides along with
    /// the last batch so it still goes out after everything queued.
    async fn flush_locked(&self, mut spill: Option<LocationSample>) -> CycleOutcome {
        let token = match self.deps.tokens.token().await {
            Some(token) => token,
            None => return self.discard_pending(spill).await,
        };

        let batch_limit = match self.submit_mode {
            SubmitMode::Auto => self.batch_size,
            SubmitMode::Single => 1,
        };

        let mut delivered = 0;
        loop {
            let pending_batch = match self.queue.drain_batch(Some(batch_limit)).await {
                Ok(batch) => batch,
                Err(e) => {
                    log::error!("Could not read pending queue: {}", e);
                    return match spill.take() {
                        Some(sample) => self.deliver_spill_only(sample, &token, delivered, e).await,
                        None => CycleOutcome::Deferred {
                            delivered,
                            pending: 0,
                            reason: e,
                        },
                    };
                }
            };

            let from_queue = pending_batch.len();
            let mut batch = pending_batch.samples.clone();
            let queue_exhausted = from_queue < batch_limit;
            let mut carries_spill = false;
            if queue_exhausted {
                if let Some(sample) = spill.take() {
                    batch.push(sample);
                    carries_spill = true;
                }
            }

            if batch.is_empty() {
                break;
            }

            match self.deliver(&batch, &token).await {
                ReportOutcome::Success => {
                    delivered += batch.len();
                    if !pending_batch.is_empty() {
                        if let Err(e) = self.queue.acknowledge(&pending_batch).await {
                            log::error!(
                                "Delivered {} sample(s) but could not remove them, they may be sent again: {}",
                                from_queue,
                                e
                            );
                            return CycleOutcome::Deferred {
                                delivered,
                                pending: from_queue,
                                reason: e,
                            };
                        }
                    }
                    if queue_exhausted {
                        break;
                    }
                }
                ReportOutcome::Retryable(reason) => {
                    let pending = self.queue.len().await.unwrap_or(from_queue);
                    if carries_spill {
                        log::error!("Unstored sample lost after failed delivery: {}", reason);
                        return CycleOutcome::Dropped { count: 1, reason };
                    }
                    return CycleOutcome::Deferred {
                        delivered,
                        pending,
                        reason,
                    };
                }
                ReportOutcome::Fatal(reason) => {
                    log::warn!(
                        "Backend rejected credentials, discarding {} sample(s): {}",
                        batch.len(),
                        reason
                    );
                    if !pending_batch.is_empty() {
                        if let Err(e) = self.queue.acknowledge(&pending_batch).await {
                            log::error!("Could not discard rejected samples: {}", e);
                        }
                    }
                    return CycleOutcome::Dropped {
                        count: batch.len(),
                        reason,
                    };
                }
            }
        }

        if delivered == 0 {
            CycleOutcome::Skipped(SkipReason::NothingPending)
        } else {
            CycleOutcome::Delivered { count: delivered }
        }
    }

    async fn deliver_spill_only(
        &self,
        sample: LocationSample,
        token: &str,
        delivered: usize,
        storage_error: TrackerError,
    ) -> CycleOutcome {
        match self.deps.reporter.report_one(&sample, token).await {
            ReportOutcome::Success => CycleOutcome::Deferred {
                delivered: delivered + 1,
                pending: 0,
                reason: storage_error,
            },
            ReportOutcome::Retryable(reason) | ReportOutcome::Fatal(reason) => {
                log::error!("Unstored sample lost after failed delivery: {}", reason);
                CycleOutcome::Dropped { count: 1, reason }
            }
        }
    }

    /// No token: queued samples can never be attributed to a user
    async fn discard_pending(&self, spill: Option<LocationSample>) -> CycleOutcome {
        let queued = match self.queue.len().await {
            Ok(n) => n,
            Err(e) => {
                log::error!("Could not read pending queue: {}", e);
                0
            }
        };
        let count = queued + spill.map_or(0, |_| 1);
        if count == 0 {
            return CycleOutcome::Skipped(SkipReason::NoToken);
        }

        log::warn!("No auth token, discarding {} pending sample(s)", count);
        if queued > 0 {
            if let Err(e) = self.queue.clear().await {
                log::error!("Could not clear pending queue: {}", e);
            }
        }
        CycleOutcome::Dropped {
            count,
            reason: TrackerError::AuthRejected,
        }
    }
}
