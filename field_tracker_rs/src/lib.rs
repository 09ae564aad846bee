//! Background location reporting pipeline for field workers.
//!
//! Samples the device position on a schedule, on push requests and on user
//! action, and delivers it to the backend. Samples taken while offline go
//! to a durable FIFO queue and are flushed in capture order once the network
//! returns.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod permission;
pub mod platform;
pub mod queue;
pub mod reporter;
pub mod sample;
pub mod sampler;
pub mod store;
pub mod tracking;
pub mod trigger;
pub mod window;

pub use config::{SubmitMode, TrackerConfig};
pub use error::{TrackerError, TrackerResult};
pub use orchestrator::{Collaborators, CycleOutcome, SkipReason, SyncOrchestrator, SyncState};
pub use queue::DurableQueue;
pub use sample::{Fix, LocationSample, Precision};
pub use trigger::{PushKind, Trigger};
