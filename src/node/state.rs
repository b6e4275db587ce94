//! Shared state for the embedded node
//!
//! Tracks the lifecycle of the current session at runtime.

use super::bridge::{NodeInfo, WalletState};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Lifecycle of the node process as driven by the supervisor
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One logical start attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorSession {
    pub lnd_dir: String,
    /// Empty while bootstrapping a new wallet; no unlock is expected then
    pub wallet_password: String,
    pub tor_enabled: bool,
    pub testnet: bool,
    pub recovery: bool,
    pub started_at: Instant,
}

impl SupervisorSession {
    pub fn new(lnd_dir: impl Into<String>, wallet_password: impl Into<String>) -> Self {
        Self {
            lnd_dir: lnd_dir.into(),
            wallet_password: wallet_password.into(),
            tor_enabled: false,
            testnet: false,
            recovery: false,
            started_at: Instant::now(),
        }
    }

    /// Session that bootstraps the node for wallet creation
    pub fn creation(lnd_dir: impl Into<String>, testnet: bool) -> Self {
        Self {
            testnet,
            ..Self::new(lnd_dir, "")
        }
    }

    pub fn with_tor(mut self, tor_enabled: bool) -> Self {
        self.tor_enabled = tor_enabled;
        self
    }

    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn with_recovery(mut self, recovery: bool) -> Self {
        self.recovery = recovery;
        self
    }

    /// Same parameters, new attempt
    pub fn renewed(&self) -> Self {
        Self {
            started_at: Instant::now(),
            ..self.clone()
        }
    }

    pub fn is_creation(&self) -> bool {
        self.wallet_password.is_empty()
    }

    pub fn password(&self) -> Option<&str> {
        if self.wallet_password.is_empty() {
            None
        } else {
            Some(&self.wallet_password)
        }
    }
}

/// Snapshot of the node for the UI
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub lifecycle: Lifecycle,

    /// Whether we marked the node as started for a real (unlockable) wallet
    pub embedded_started: bool,

    /// Last state reported by the state stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_state: Option<WalletState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<NodeInfo>,

    pub syncing: bool,

    /// Uptime in seconds (if running)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,

    /// Last error message (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Internal state of the node controller
#[derive(Debug, Default)]
pub struct NodeState {
    status: Mutex<NodeStatus>,
    start_time: Mutex<Option<Instant>>,
}

impl NodeState {
    /// Get the current status
    pub fn get_status(&self) -> NodeStatus {
        let mut status = self.status().clone();

        if status.lifecycle == Lifecycle::Running {
            if let Some(start) = *lock(&self.start_time) {
                status.uptime = Some(start.elapsed().as_secs());
            }
        }

        status
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.status().lifecycle
    }

    pub fn set_lifecycle(&self, lifecycle: Lifecycle) {
        let previous = std::mem::replace(&mut self.status().lifecycle, lifecycle);
        if previous != lifecycle {
            log::debug!("Node lifecycle {:?} -> {:?}", previous, lifecycle);
        }

        match lifecycle {
            Lifecycle::Running => {
                lock(&self.start_time).get_or_insert_with(Instant::now);
            }
            Lifecycle::Stopped => *lock(&self.start_time) = None,
            _ => {}
        }
    }

    /// Mark the node running; uptime counts from when the session began
    pub fn set_running_since(&self, started_at: Instant) {
        *lock(&self.start_time) = Some(started_at);
        self.set_lifecycle(Lifecycle::Running);
    }

    pub fn embedded_started(&self) -> bool {
        self.status().embedded_started
    }

    pub fn set_embedded_started(&self, started: bool) {
        self.status().embedded_started = started;
    }

    pub fn set_wallet_state(&self, state: WalletState) {
        self.status().wallet_state = Some(state);
    }

    pub fn set_info(&self, info: NodeInfo) {
        self.status().info = Some(info);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.status().error = error;
    }

    /// Mark syncing as started; false if it already was
    pub fn begin_sync(&self) -> bool {
        let mut status = self.status();
        !std::mem::replace(&mut status.syncing, true)
    }

    /// Forget everything the last session reported and mark the node stopped
    pub fn reset_session(&self) {
        {
            let mut status = self.status();
            status.wallet_state = None;
            status.info = None;
            status.syncing = false;
        }
        self.set_lifecycle(Lifecycle::Stopped);
    }

    fn status(&self) -> MutexGuard<'_, NodeStatus> {
        lock(&self.status)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Type alias for shared node state
pub type SharedNodeState = Arc<NodeState>;

/// Create a new shared node state
pub fn create_node_state() -> SharedNodeState {
    Arc::new(NodeState::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_modes() {
        let session = SupervisorSession::creation("lnd", true);
        assert!(session.is_creation());
        assert_eq!(session.password(), None);
        assert!(session.testnet);

        let session = SupervisorSession::new("lnd", "hunter2").with_tor(true).with_recovery(true);
        assert!(!session.is_creation());
        assert_eq!(session.password(), Some("hunter2"));
        assert!(session.tor_enabled);
        assert!(session.recovery);
    }

    #[test]
    fn test_lifecycle_tracks_uptime() {
        let state = create_node_state();
        assert_eq!(state.lifecycle(), Lifecycle::Stopped);
        assert_eq!(state.get_status().uptime, None);

        state.set_lifecycle(Lifecycle::Running);
        assert_eq!(state.get_status().uptime, Some(0));

        state.set_lifecycle(Lifecycle::Stopped);
        assert_eq!(state.get_status().uptime, None);
    }

    #[test]
    fn test_uptime_counts_from_session_start() {
        let state = NodeState::default();
        let session = SupervisorSession::new("lnd", "secret");
        let earlier = session.started_at - std::time::Duration::from_secs(5);

        state.set_running_since(earlier);

        assert_eq!(state.lifecycle(), Lifecycle::Running);
        assert!(state.get_status().uptime.unwrap() >= 5);
    }

    #[test]
    fn test_begin_sync_once() {
        let state = NodeState::default();
        assert!(state.begin_sync());
        assert!(!state.begin_sync());
        assert!(state.get_status().syncing);
    }

    #[test]
    fn test_reset_session_clears_reported_state() {
        let state = NodeState::default();
        state.set_lifecycle(Lifecycle::Running);
        state.set_wallet_state(WalletState::RpcActive);
        state.set_info(NodeInfo::default());
        assert!(state.begin_sync());

        state.reset_session();

        let status = state.get_status();
        assert_eq!(status.lifecycle, Lifecycle::Stopped);
        assert_eq!(status.wallet_state, None);
        assert_eq!(status.info, None);
        assert!(!status.syncing);
        assert!(state.begin_sync());
    }

    #[test]
    fn test_status_serialization() {
        let state = NodeState::default();
        state.set_wallet_state(WalletState::RpcActive);
        let json = serde_json::to_value(state.get_status()).unwrap();
        assert_eq!(json["lifecycle"], "stopped");
        assert_eq!(json["walletState"], "rpcActive");
        assert!(json.get("error").is_none());
    }
}
