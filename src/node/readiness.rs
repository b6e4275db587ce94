//! Node readiness tracking
//!
//! Follows the node's wallet state stream after a start, unlocks the wallet
//! when asked to, and resolves once the RPC server answers, the wallet turns
//! out not to exist yet, or something goes irrecoverably wrong.

use super::bridge::{NativeBridge, NodeInfo, SyncTracker, WalletState};
use super::config::ControllerConfig;
use super::error::{classify, NodeError, NodeErrorKind};
use super::events::{NativeEvent, SharedEventHub, STATE_EVENT};
use super::state::{SharedNodeState, SupervisorSession};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

/// How a wait for readiness ended
#[derive(Debug)]
pub enum ReadyOutcome {
    /// The node has no wallet yet and is waiting for one to be created
    NeedsWallet,
    /// The RPC server is serving
    Ready {
        state: WalletState,
        /// `None` when the best-effort info poll on `ServerActive` failed
        info: Option<NodeInfo>,
    },
    Failed(NodeError),
    TimedOut,
}

impl ReadyOutcome {
    /// Collapse into the state reached, or the error that ended the wait
    pub fn into_result(self) -> Result<WalletState, NodeError> {
        match self {
            ReadyOutcome::NeedsWallet => Ok(WalletState::NonExisting),
            ReadyOutcome::Ready { state, .. } => Ok(state),
            ReadyOutcome::Failed(err) => Err(err),
            ReadyOutcome::TimedOut => Err(NodeError::kind_only(NodeErrorKind::ReadyTimeout)),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ReadyOutcome::Ready { .. })
    }
}

enum Step {
    Continue,
    Resolve(ReadyOutcome),
}

/// Flags scoped to one wait
struct Watch<'s> {
    session: &'s SupervisorSession,
    unlock_attempted: bool,
}

/// Waits for the embedded node to become usable
pub struct ReadinessWatcher {
    bridge: Arc<dyn NativeBridge>,
    events: SharedEventHub,
    state: SharedNodeState,
    sync: Option<Arc<dyn SyncTracker>>,
    config: ControllerConfig,
}

impl ReadinessWatcher {
    pub fn new(
        bridge: Arc<dyn NativeBridge>,
        events: SharedEventHub,
        state: SharedNodeState,
        config: ControllerConfig,
    ) -> Self {
        Self {
            bridge,
            events,
            state,
            sync: None,
            config,
        }
    }

    /// Start chain sync tracking once the node is ready
    pub fn with_sync_tracker(mut self, tracker: Arc<dyn SyncTracker>) -> Self {
        self.sync = Some(tracker);
        self
    }

    /// Wait until the node is ready for use or for wallet creation.
    ///
    /// Exactly one outcome is produced. The state listener is removed before
    /// this returns, so events arriving afterwards are dropped.
    pub async fn wait_for_ready(&self, session: &SupervisorSession) -> ReadyOutcome {
        let mut listener = self.events.listen(STATE_EVENT);
        let timeout = self.config.ready_timeout();

        let outcome = match tokio::time::timeout(timeout, self.watch(&mut listener.receiver, session)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                log::error!("Node did not become ready within {}s", timeout.as_secs());
                ReadyOutcome::TimedOut
            }
        };

        self.events.remove_listener(STATE_EVENT, listener.id);
        listener.receiver.close();

        match outcome {
            ReadyOutcome::Failed(ref err) => log::error!("Waiting for node failed: {}", err),
            ReadyOutcome::NeedsWallet => log::info!("Node is ready for wallet creation"),
            ReadyOutcome::Ready { state, .. } => log::info!("Node is ready ({:?})", state),
            ReadyOutcome::TimedOut => {}
        }
        outcome
    }

    async fn watch(&self, events: &mut UnboundedReceiver<NativeEvent>, session: &SupervisorSession) -> ReadyOutcome {
        // Give the listener registration time to land on the native side
        tokio::time::sleep(self.config.listener_settle()).await;

        if let Err(e) = self.bridge.subscribe_state().await {
            return ReadyOutcome::Failed(e.into());
        }

        let mut watch = Watch {
            session,
            unlock_attempted: false,
        };

        // Events queue in delivery order while a handler awaits
        while let Some(event) = events.recv().await {
            if let Step::Resolve(outcome) = self.handle_event(event, &mut watch).await {
                return outcome;
            }
        }

        ReadyOutcome::Failed(NodeError::with_detail(
            NodeErrorKind::StreamInvalidResponse,
            "state listener was replaced",
        ))
    }

    async fn handle_event(&self, event: NativeEvent, watch: &mut Watch<'_>) -> Step {
        let state = match event.data.as_deref() {
            Some(data) if !data.is_empty() => match self.bridge.decode_state_event(data) {
                Ok(state) => state,
                Err(e) => return stream_error(e.message()),
            },
            _ => match event.error_text() {
                Some(text) => return stream_error(&text),
                None => {
                    return Step::Resolve(ReadyOutcome::Failed(NodeError::with_detail(
                        NodeErrorKind::StreamInvalidResponse,
                        "state event without payload",
                    )))
                }
            },
        };

        log::info!("Node wallet state: {:?}", state);
        self.state.set_wallet_state(state);

        match state {
            WalletState::NonExisting => {
                tokio::time::sleep(self.config.non_existing_settle()).await;
                Step::Resolve(ReadyOutcome::NeedsWallet)
            }
            WalletState::Locked => self.on_locked(watch).await,
            WalletState::Unlocked => Step::Continue,
            WalletState::RpcActive | WalletState::ServerActive => self.on_rpc_active(state, watch.session).await,
            WalletState::WaitingToStart | WalletState::Unknown(_) => {
                log::debug!("Still waiting, ignoring state {:?}", state);
                Step::Continue
            }
        }
    }

    async fn on_locked(&self, watch: &mut Watch<'_>) -> Step {
        if watch.unlock_attempted {
            log::debug!("Unlock already attempted for this session");
            return Step::Continue;
        }
        let Some(password) = watch.session.password() else {
            log::info!("Wallet is locked and no password was given, waiting");
            return Step::Continue;
        };

        watch.unlock_attempted = true;
        log::info!("Unlocking wallet");
        match self.bridge.unlock_wallet(password).await {
            Ok(()) => Step::Continue,
            Err(e) => {
                let err = NodeError::from_bridge(e);
                match err.kind() {
                    Some(kind) if kind.is_transient_retryable() => {
                        log::warn!("Unlock hit a transient error, waiting for state: {}", err);
                        Step::Continue
                    }
                    _ => Step::Resolve(ReadyOutcome::Failed(err)),
                }
            }
        }
    }

    async fn on_rpc_active(&self, state: WalletState, session: &SupervisorSession) -> Step {
        match self.poll_rpc_ready().await {
            Ok(info) => {
                self.state.set_info(info.clone());
                self.start_sync(session).await;
                Step::Resolve(ReadyOutcome::Ready {
                    state,
                    info: Some(info),
                })
            }
            Err(err) if state == WalletState::ServerActive => {
                log::warn!("GetInfo failed on an active server, continuing: {}", err);
                self.start_sync(session).await;
                Step::Resolve(ReadyOutcome::Ready { state, info: None })
            }
            Err(err) => Step::Resolve(ReadyOutcome::Failed(err)),
        }
    }

    /// Call GetInfo until it answers; only "not ready yet" errors are retried
    async fn poll_rpc_ready(&self) -> Result<NodeInfo, NodeError> {
        let deadline = Instant::now() + self.config.rpc_ready_timeout();
        let interval = self.config.rpc_poll_interval();
        let mut polls = 0u32;

        loop {
            polls += 1;
            let err = match self.bridge.get_info().await {
                Ok(info) => {
                    log::info!(
                        "Node RPC ready after {} poll(s) (height {}, pubkey {})",
                        polls,
                        info.block_height,
                        info.identity_pubkey
                    );
                    return Ok(info);
                }
                Err(e) => NodeError::from_bridge(e),
            };

            match err.kind() {
                Some(NodeErrorKind::RpcNotReady) | Some(NodeErrorKind::MacaroonStoreLocked) => {}
                _ => return Err(err),
            }

            if Instant::now() + interval >= deadline {
                return Err(NodeError::with_detail(NodeErrorKind::RpcReadyTimeout, err.raw()));
            }
            log::debug!("RPC not ready yet (poll {}): {}", polls, err);
            tokio::time::sleep(interval).await;
        }
    }

    async fn start_sync(&self, session: &SupervisorSession) {
        if session.password().is_none() {
            return;
        }
        let Some(ref tracker) = self.sync else {
            return;
        };
        if tracker.is_syncing() || !self.state.begin_sync() {
            return;
        }

        log::info!("Starting chain sync tracking");
        tracker.start().await;
    }
}

/// Errors on the state stream: end-of-stream and transient errors are ignored
fn stream_error(raw: &str) -> Step {
    match classify(raw) {
        Some(NodeErrorKind::StreamEof) => {
            log::debug!("Ignoring end of state stream: {}", raw);
            Step::Continue
        }
        Some(kind) if kind.is_transient_retryable() => {
            log::debug!("Ignoring transient state stream error: {}", raw);
            Step::Continue
        }
        Some(kind) => Step::Resolve(ReadyOutcome::Failed(NodeError::with_detail(kind, raw))),
        None => Step::Resolve(ReadyOutcome::Failed(NodeError::Native(raw.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::events::EventHub;
    use crate::node::state::create_node_state;
    use crate::node::testing::{state_event, Call, FakeBridge, FakeSyncTracker};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn watcher(bridge: &Arc<FakeBridge>) -> ReadinessWatcher {
        ReadinessWatcher::new(
            bridge.clone(),
            bridge.events.clone(),
            create_node_state(),
            ControllerConfig::default(),
        )
    }

    fn unlocks(bridge: &FakeBridge) -> usize {
        bridge.count(|c| matches!(c, Call::Unlock(_)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_locked_unlocked_rpc_active() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![
            state_event(WalletState::Locked),
            state_event(WalletState::Unlocked),
            state_event(WalletState::RpcActive),
            state_event(WalletState::Locked),
        ]);
        let watcher = watcher(&bridge);

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;

        assert!(matches!(
            outcome,
            ReadyOutcome::Ready {
                state: WalletState::RpcActive,
                info: Some(_)
            }
        ));
        assert_eq!(unlocks(&bridge), 1);
        // Listener is gone; late events go nowhere
        assert!(!bridge.events.has_listener(STATE_EVENT));
        assert!(!bridge.events.emit(STATE_EVENT, state_event(WalletState::Locked)));
        assert_eq!(unlocks(&bridge), 1);
        assert_eq!(watcher.state.get_status().wallet_state, Some(WalletState::RpcActive));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_locked_unlocks_once() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![
            state_event(WalletState::Locked),
            state_event(WalletState::Locked),
            state_event(WalletState::Unlocked),
            state_event(WalletState::ServerActive),
        ]);
        let watcher = watcher(&bridge);

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;
        assert!(outcome.is_ready());
        assert_eq!(unlocks(&bridge), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_existing_needs_wallet() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![
            state_event(WalletState::WaitingToStart),
            state_event(WalletState::NonExisting),
        ]);
        let watcher = watcher(&bridge);
        let started = Instant::now();

        let outcome = watcher.wait_for_ready(&SupervisorSession::creation("lnd", true)).await;

        assert!(matches!(outcome, ReadyOutcome::NeedsWallet));
        // listener settle + non-existing settle
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_events() {
        let bridge = FakeBridge::new();
        let watcher = watcher(&bridge);
        let started = Instant::now();

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;

        assert!(matches!(outcome, ReadyOutcome::TimedOut));
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(!bridge.events.has_listener(STATE_EVENT));
        assert!(outcome.into_result().unwrap_err().is_kind(NodeErrorKind::ReadyTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eof_and_transient_errors_are_ignored() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![
            NativeEvent::with_error("1", "error reading from server: EOF"),
            NativeEvent::with_error("1", "the RPC server is in the process of starting up"),
            state_event(WalletState::RpcActive),
        ]);
        let watcher = watcher(&bridge);

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;
        assert!(outcome.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_stream_error_fails() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![
            NativeEvent::with_error("13", "permission denied"),
            state_event(WalletState::RpcActive),
        ]);
        let watcher = watcher(&bridge);

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;
        assert!(matches!(outcome, ReadyOutcome::Failed(NodeError::Native(ref m)) if m == "permission denied"));
        assert_eq!(bridge.count(|c| *c == Call::GetInfo), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_fails() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![NativeEvent::with_data(vec![1, 2])]);
        let watcher = watcher(&bridge);

        let err = watcher
            .wait_for_ready(&SupervisorSession::new("lnd", "secret"))
            .await
            .into_result()
            .unwrap_err();
        assert!(err.is_kind(NodeErrorKind::StreamInvalidResponse));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_poll_retries_not_ready() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![state_event(WalletState::RpcActive)]);
        bridge.push_info(Err("server is still in the process of starting"));
        bridge.push_info(Err("macaroon store is locked"));
        let watcher = watcher(&bridge);

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;

        assert!(outcome.is_ready());
        assert_eq!(bridge.count(|c| *c == Call::GetInfo), 3);
        assert!(watcher.state.get_status().info.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_poll_connection_closed_is_fatal() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![state_event(WalletState::RpcActive)]);
        bridge.push_info(Err("grpc connection closed"));
        let watcher = watcher(&bridge);

        let err = watcher
            .wait_for_ready(&SupervisorSession::new("lnd", "secret"))
            .await
            .into_result()
            .unwrap_err();
        assert!(err.is_kind(NodeErrorKind::RpcConnectionClosed));
        assert_eq!(bridge.count(|c| *c == Call::GetInfo), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_active_is_best_effort() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![state_event(WalletState::ServerActive)]);
        bridge.push_info(Err("grpc connection closed"));
        let watcher = watcher(&bridge);

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;
        assert!(matches!(
            outcome,
            ReadyOutcome::Ready {
                state: WalletState::ServerActive,
                info: None
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rpc_poll_times_out() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![state_event(WalletState::RpcActive)]);
        for _ in 0..40 {
            bridge.push_info(Err("starting up"));
        }
        let watcher = watcher(&bridge);

        let err = watcher
            .wait_for_ready(&SupervisorSession::new("lnd", "secret"))
            .await
            .into_result()
            .unwrap_err();
        assert!(err.is_kind(NodeErrorKind::RpcReadyTimeout));
        assert_eq!(bridge.count(|c| *c == Call::GetInfo), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlock_failure_resolves() {
        let bridge = FakeBridge::new();
        bridge.push_subscription(vec![state_event(WalletState::Locked)]);
        bridge.push_unlock(Err("invalid passphrase for master public key"));
        let watcher = watcher(&bridge);

        let outcome = watcher.wait_for_ready(&SupervisorSession::new("lnd", "wrong")).await;
        assert!(matches!(outcome, ReadyOutcome::Failed(NodeError::Native(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_tracking_starts_once_with_password() {
        let bridge = FakeBridge::new();
        bridge.set_default_events(vec![state_event(WalletState::RpcActive)]);
        let tracker = Arc::new(FakeSyncTracker::default());
        let watcher = watcher(&bridge).with_sync_tracker(tracker.clone());

        watcher.wait_for_ready(&SupervisorSession::creation("lnd", false)).await;
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 0);

        watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;
        watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await;
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_listener_fails_the_wait() {
        let bridge = FakeBridge::new();
        let hub: SharedEventHub = Arc::new(EventHub::new());
        let watcher = Arc::new(ReadinessWatcher::new(
            bridge.clone(),
            hub.clone(),
            create_node_state(),
            ControllerConfig::default(),
        ));

        let waiting = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.wait_for_ready(&SupervisorSession::new("lnd", "secret")).await })
        };
        tokio::task::yield_now().await;

        let _other = hub.listen(STATE_EVENT);
        let outcome = waiting.await.unwrap();

        let err = outcome.into_result().unwrap_err();
        assert!(err.is_kind(NodeErrorKind::StreamInvalidResponse));
    }
}
