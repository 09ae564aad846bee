use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Push notification kinds that concern location reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushKind {
    /// Dispatcher asked for the worker's position right now
    LocationRequest,
    /// Server-scheduled routine report
    ScheduledLocation,
}

/// What woke the orchestrator up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Background scheduler tick
    PeriodicTick,
    Push { kind: PushKind, foreground: bool },
    /// Network came back; only the queue is flushed
    ConnectivityRestored,
    /// Explicit user action such as marking attendance
    UserAction,
    /// App restarted with tracking previously active
    ColdStartResume,
}

impl Trigger {
    /// Whether this trigger captures a new position
    pub fn samples_position(&self) -> bool {
        !matches!(self, Trigger::ConnectivityRestored)
    }

    /// On-demand triggers ignore the reporting window
    pub fn is_on_demand(&self) -> bool {
        matches!(
            self,
            Trigger::UserAction
                | Trigger::Push {
                    kind: PushKind::LocationRequest,
                    ..
                }
        )
    }

    /// Value of the `is_real_time` flag for a sample taken on this trigger
    pub fn is_real_time(&self) -> bool {
        matches!(
            self,
            Trigger::UserAction
                | Trigger::Push {
                    kind: PushKind::LocationRequest,
                    foreground: true,
                }
        )
    }

    /// Interactive triggers surface failures to the user
    pub fn is_interactive(&self) -> bool {
        matches!(self, Trigger::UserAction)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Trigger::PeriodicTick => "periodic",
            Trigger::Push {
                kind: PushKind::LocationRequest,
                ..
            } => "push:location_request",
            Trigger::Push {
                kind: PushKind::ScheduledLocation,
                ..
            } => "push:scheduled_location",
            Trigger::ConnectivityRestored => "connectivity",
            Trigger::UserAction => "user",
            Trigger::ColdStartResume => "cold_start",
        }
    }
}

fn kind_of(data: &Value) -> Option<PushKind> {
    match data.get("type")?.as_str()? {
        "location_request" => Some(PushKind::LocationRequest),
        "scheduled_location" => Some(PushKind::ScheduledLocation),
        _ => None,
    }
}

/// Extract the location-relevant kind from a push payload.
///
/// Foreground listeners see the data object directly; background tasks get
/// it wrapped as `{notification: {data: {...}}}`, and some senders use
/// `{data: {...}}`. Anything else is not ours and yields `None`.
pub fn parse_push_payload(payload: &Value) -> Option<PushKind> {
    kind_of(payload)
        .or_else(|| payload.get("data").and_then(kind_of))
        .or_else(|| {
            payload
                .get("notification")
                .and_then(|n| n.get("data"))
                .and_then(kind_of)
        })
}
