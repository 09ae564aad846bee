use crate::error::TrackerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    /// Stable until the user changes it in system settings
    Denied,
    /// Never asked; a request will show the OS dialog
    Undetermined,
}

/// Platform location authorization
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn foreground_status(&self) -> TrackerResult<PermissionStatus>;
    async fn request_foreground(&self) -> TrackerResult<PermissionStatus>;
    async fn background_status(&self) -> TrackerResult<PermissionStatus>;
    async fn request_background(&self) -> TrackerResult<PermissionStatus>;
}

/// Returns true if foreground location access is granted, prompting at most
/// once when the user has not decided yet.
pub async fn ensure_foreground_permission(gate: &dyn PermissionGate) -> bool {
    let status = match gate.foreground_status().await {
        Ok(status) => status,
        Err(e) => {
            log::warn!("Foreground permission check failed: {}", e);
            return false;
        }
    };

    match status {
        PermissionStatus::Granted => true,
        PermissionStatus::Denied => false,
        PermissionStatus::Undetermined => match gate.request_foreground().await {
            Ok(status) => status == PermissionStatus::Granted,
            Err(e) => {
                log::warn!("Foreground permission request failed: {}", e);
                false
            }
        },
    }
}

/// Background access is only asked for once foreground access is granted.
pub async fn ensure_background_permission(gate: &dyn PermissionGate) -> bool {
    if !ensure_foreground_permission(gate).await {
        return false;
    }

    let status = match gate.background_status().await {
        Ok(status) => status,
        Err(e) => {
            log::warn!("Background permission check failed: {}", e);
            return false;
        }
    };

    match status {
        PermissionStatus::Granted => true,
        PermissionStatus::Denied => false,
        PermissionStatus::Undetermined => match gate.request_background().await {
            Ok(status) => status == PermissionStatus::Granted,
            Err(e) => {
                log::warn!("Background permission request failed: {}", e);
                false
            }
        },
    }
}

/// Permission state reported by the host app, which owns the OS dialogs.
/// Requests cannot prompt from here, so they return the last reported state.
#[derive(Debug, Clone)]
pub struct HostPermissions {
    state: Arc<RwLock<(PermissionStatus, PermissionStatus)>>,
}

impl HostPermissions {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new((
                PermissionStatus::Undetermined,
                PermissionStatus::Undetermined,
            ))),
        }
    }

    pub fn set(&self, foreground: PermissionStatus, background: PermissionStatus) {
        if let Ok(mut state) = self.state.write() {
            *state = (foreground, background);
        }
    }

    fn read(&self) -> (PermissionStatus, PermissionStatus) {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or((PermissionStatus::Undetermined, PermissionStatus::Undetermined))
    }
}

impl Default for HostPermissions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionGate for HostPermissions {
    async fn foreground_status(&self) -> TrackerResult<PermissionStatus> {
        Ok(self.read().0)
    }

    async fn request_foreground(&self) -> TrackerResult<PermissionStatus> {
        Ok(self.read().0)
    }

    async fn background_status(&self) -> TrackerResult<PermissionStatus> {
        Ok(self.read().1)
    }

    async fn request_background(&self) -> TrackerResult<PermissionStatus> {
        Ok(self.read().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Gate that answers requests with a scripted status and counts prompts
    struct PromptingGate {
        foreground: Mutex<PermissionStatus>,
        background: Mutex<PermissionStatus>,
        answer: PermissionStatus,
        prompts: AtomicU32,
    }

    impl PromptingGate {
        fn new(fg: PermissionStatus, bg: PermissionStatus, answer: PermissionStatus) -> Self {
            Self {
                foreground: Mutex::new(fg),
                background: Mutex::new(bg),
                answer,
                prompts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PermissionGate for PromptingGate {
        async fn foreground_status(&self) -> TrackerResult<PermissionStatus> {
            Ok(*self.foreground.lock().unwrap())
        }

        async fn request_foreground(&self) -> TrackerResult<PermissionStatus> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            *self.foreground.lock().unwrap() = self.answer;
            Ok(self.answer)
        }

        async fn background_status(&self) -> TrackerResult<PermissionStatus> {
            Ok(*self.background.lock().unwrap())
        }

        async fn request_background(&self) -> TrackerResult<PermissionStatus> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            *self.background.lock().unwrap() = self.answer;
            Ok(self.answer)
        }
    }

    #[tokio::test]
    async fn test_undetermined_prompts_once() {
        use PermissionStatus::*;
        let gate = PromptingGate::new(Undetermined, Undetermined, Granted);

        assert!(ensure_foreground_permission(&gate).await);
        assert!(ensure_foreground_permission(&gate).await);
        assert_eq!(gate.prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denied_is_not_reprompted() {
        use PermissionStatus::*;
        let gate = PromptingGate::new(Denied, Undetermined, Granted);

        assert!(!ensure_foreground_permission(&gate).await);
        assert!(!ensure_background_permission(&gate).await);
        assert_eq!(gate.prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_background_requires_foreground() {
        use PermissionStatus::*;
        let gate = PromptingGate::new(Undetermined, Undetermined, Denied);

        assert!(!ensure_background_permission(&gate).await);
        // Only the foreground dialog was shown
        assert_eq!(gate.prompts.load(Ordering::SeqCst), 1);
        assert_eq!(gate.background_status().await.unwrap(), Undetermined);
    }

    #[tokio::test]
    async fn test_host_permissions() {
        use PermissionStatus::*;
        let gate = HostPermissions::new();
        assert!(!ensure_foreground_permission(&gate).await);

        gate.set(Granted, Denied);
        assert!(ensure_foreground_permission(&gate).await);
        assert!(!ensure_background_permission(&gate).await);

        gate.set(Granted, Granted);
        assert!(ensure_background_permission(&gate).await);
    }
}
