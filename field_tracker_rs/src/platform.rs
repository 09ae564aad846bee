//! Capabilities the pipeline consumes from the host app: the auth token,
//! network state, battery level and wall clock.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use std::sync::{Arc, RwLock};

/// Read-only access to the bearer token owned by the authentication subsystem
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// Platform network-state observer
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Battery level as a fraction 0.0-1.0, `None` when the platform can't say
#[async_trait]
pub trait BatterySource: Send + Sync {
    async fn battery_fraction(&self) -> Option<f64>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Device-local wall time, used for the reporting window
    fn local_now(&self) -> DateTime<FixedOffset>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_now(&self) -> DateTime<FixedOffset> {
        let now = Local::now();
        now.with_timezone(&now.offset().fix())
    }
}

#[derive(Debug, Clone, Default)]
struct HostSnapshot {
    token: Option<String>,
    connected: bool,
    battery: Option<f64>,
}

/// Token, connectivity and battery facts pushed in by the host.
///
/// The JNI bridge and the CLI both feed this from their own sources;
/// clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    inner: Arc<RwLock<HostSnapshot>>,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut state) = self.inner.write() {
            state.token = token.filter(|t| !t.is_empty());
        }
    }

    pub fn set_connected(&self, connected: bool) {
        if let Ok(mut state) = self.inner.write() {
            state.connected = connected;
        }
    }

    pub fn set_battery_fraction(&self, fraction: Option<f64>) {
        if let Ok(mut state) = self.inner.write() {
            state.battery = fraction;
        }
    }

    fn snapshot(&self) -> HostSnapshot {
        self.inner
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TokenSource for HostState {
    async fn token(&self) -> Option<String> {
        self.snapshot().token
    }
}

#[async_trait]
impl Connectivity for HostState {
    async fn is_connected(&self) -> bool {
        self.snapshot().connected
    }
}

#[async_trait]
impl BatterySource for HostState {
    async fn battery_fraction(&self) -> Option<f64> {
        self.snapshot().battery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_state_shared_between_clones() {
        let state = HostState::new();
        let view = state.clone();

        assert!(!view.is_connected().await);
        assert_eq!(view.token().await, None);

        state.set_connected(true);
        state.set_token(Some("abc".to_string()));
        state.set_battery_fraction(Some(0.5));

        assert!(view.is_connected().await);
        assert_eq!(view.token().await.as_deref(), Some("abc"));
        assert_eq!(view.battery_fraction().await, Some(0.5));
    }

    #[tokio::test]
    async fn test_empty_token_reads_as_missing() {
        let state = HostState::new();
        state.set_token(Some(String::new()));
        assert_eq!(state.token().await, None);
    }
}
