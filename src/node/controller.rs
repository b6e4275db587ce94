//! Node controller
//!
//! The entry point for callers: wires the supervisor, readiness watcher,
//! wallet provisioner and peer optimizer to one bridge and one settings
//! store, and remembers the current session.

use super::bridge::{NativeBridge, SyncTracker};
use super::config::ControllerConfig;
use super::error::NodeError;
use super::events::SharedEventHub;
use super::peers::{PeerOptimizer, PeerSelection, Pinger, TcpPinger};
use super::provisioner::{CreateWalletParams, CreatedWallet, WalletProvisioner};
use super::readiness::{ReadinessWatcher, ReadyOutcome};
use super::settings::SharedSettings;
use super::state::{create_node_state, Lifecycle, NodeStatus, SharedNodeState, SupervisorSession};
use super::supervisor::{ProcessSupervisor, StopOptions};
use std::sync::{Arc, Mutex};

/// Peers kept by [`NodeController::optimize_peers`] when no count is given
pub const DEFAULT_PEER_TARGET: usize = 3;

/// Manages the embedded node on behalf of the wallet
pub struct NodeController {
    bridge: Arc<dyn NativeBridge>,
    events: SharedEventHub,
    settings: SharedSettings,
    state: SharedNodeState,
    config: ControllerConfig,
    supervisor: Arc<ProcessSupervisor>,
    watcher: Arc<ReadinessWatcher>,
    provisioner: WalletProvisioner,
    /// Overrides the TCP pinger picked per network
    pinger: Option<Arc<dyn Pinger>>,
    session: Mutex<Option<SupervisorSession>>,
}

impl NodeController {
    pub fn new(
        bridge: Arc<dyn NativeBridge>,
        events: SharedEventHub,
        settings: SharedSettings,
        config: ControllerConfig,
    ) -> Self {
        let state = create_node_state();
        let supervisor = Arc::new(ProcessSupervisor::new(
            bridge.clone(),
            settings.clone(),
            state.clone(),
            config.clone(),
        ));
        let watcher = Arc::new(ReadinessWatcher::new(
            bridge.clone(),
            events.clone(),
            state.clone(),
            config.clone(),
        ));
        let provisioner = WalletProvisioner::new(bridge.clone(), supervisor.clone(), watcher.clone(), config.clone());

        Self {
            bridge,
            events,
            settings,
            state,
            config,
            supervisor,
            watcher,
            provisioner,
            pinger: None,
            session: Mutex::new(None),
        }
    }

    /// Start chain sync tracking whenever an unlocked node becomes ready
    pub fn with_sync_tracker(mut self, tracker: Arc<dyn SyncTracker>) -> Self {
        let watcher = Arc::new(
            ReadinessWatcher::new(
                self.bridge.clone(),
                self.events.clone(),
                self.state.clone(),
                self.config.clone(),
            )
            .with_sync_tracker(tracker),
        );
        self.provisioner = WalletProvisioner::new(
            self.bridge.clone(),
            self.supervisor.clone(),
            watcher.clone(),
            self.config.clone(),
        );
        self.watcher = watcher;
        self
    }

    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = Some(pinger);
        self
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the node for an existing wallet
    pub async fn start_node(
        &self,
        lnd_dir: &str,
        wallet_password: &str,
        tor_enabled: bool,
        testnet: bool,
        recovery: bool,
    ) -> Result<(), NodeError> {
        let session = SupervisorSession::new(lnd_dir, wallet_password)
            .with_tor(tor_enabled)
            .with_testnet(testnet)
            .with_recovery(recovery);

        self.supervisor.start(&session).await?;
        *self.current_session() = Some(session);
        Ok(())
    }

    pub async fn stop_node(&self, options: StopOptions) -> Result<(), NodeError> {
        self.supervisor.stop(options).await
    }

    /// Stop with the configured defaults
    pub async fn stop_node_default(&self) -> Result<(), NodeError> {
        self.stop_node(StopOptions::from_config(&self.config)).await
    }

    /// Stop the node, let it settle and start the last session again
    pub async fn restart_node(&self) -> Result<(), NodeError> {
        let previous = self.current_session().clone().ok_or(NodeError::NoSession)?;

        log::info!("Restarting embedded node");
        self.stop_node_default().await?;
        tokio::time::sleep(self.config.cleanup_delay()).await;

        let session = previous.renewed();
        self.supervisor.start(&session).await?;
        *self.current_session() = Some(session);
        Ok(())
    }

    /// Wait until the node started by the last [`Self::start_node`] is ready
    pub async fn wait_for_ready(&self) -> ReadyOutcome {
        let Some(session) = self.current_session().clone() else {
            return ReadyOutcome::Failed(NodeError::NoSession);
        };
        self.watcher.wait_for_ready(&session).await
    }

    pub async fn create_wallet(&self, params: &CreateWalletParams) -> Result<CreatedWallet, NodeError> {
        self.provisioner.create_wallet(params).await
    }

    // ========================================================================
    // Peers
    // ========================================================================

    /// Pick fast neutrino peers and persist them for the next start.
    ///
    /// An empty selection leaves the configured peers untouched.
    pub async fn optimize_peers(&self, testnet: bool, target_count: Option<usize>) -> Result<PeerSelection, NodeError> {
        let pinger = self
            .pinger
            .clone()
            .unwrap_or_else(|| Arc::new(TcpPinger::for_network(testnet)) as Arc<dyn Pinger>);
        let optimizer = PeerOptimizer::new(pinger, self.config.clone());

        let selection = optimizer
            .optimize(testnet, target_count.unwrap_or(DEFAULT_PEER_TARGET))
            .await;
        if selection.is_empty() {
            log::warn!("No responsive neutrino peers found, keeping the configured ones");
            return Ok(selection);
        }

        self.settings.set_neutrino_peers(testnet, selection.peers.clone())?;
        self.settings.set_dont_allow_other_peers(selection.restrict_to_selected)?;
        Ok(selection)
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub fn status(&self) -> NodeStatus {
        self.state.get_status()
    }

    /// Ask the bridge whether the process is still up and fold that into the status
    pub async fn refresh_status(&self) -> Result<NodeStatus, NodeError> {
        let flags = self.bridge.check_status().await?;
        if !flags.is_running() && self.state.lifecycle() == Lifecycle::Running {
            log::warn!("Node process is gone while marked running");
            self.state.reset_session();
        }
        Ok(self.state.get_status())
    }

    fn current_session(&self) -> std::sync::MutexGuard<'_, Option<SupervisorSession>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}
