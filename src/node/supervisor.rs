//! Embedded node process supervision
//!
//! Handles starting and stopping the node runtime through the native
//! bridge, reconciling the bridge's own view of the process with what the
//! controller last marked.

use super::bridge::NativeBridge;
use super::config::{ControllerConfig, LndConfig};
use super::error::{is_stop_expected, BridgeError, NodeError, NodeErrorKind};
use super::retry::{retry, RetrySpec};
use super::settings::SharedSettings;
use super::state::{Lifecycle, SharedNodeState, SupervisorSession};
use futures_util::FutureExt;
use std::sync::Arc;
use std::time::Duration;

/// Start argument that makes the node forget and rescan wallet transactions
pub const RESCAN_ARG: &str = "--reset-wallet-transactions";

/// Parameters of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    /// Status polls after the stop calls before giving up
    pub max_retries: u32,
    /// Wait between status polls
    pub delay: Duration,
    /// Skip the initial status check and always issue stop and kill
    pub force: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            max_retries: 10,
            delay: Duration::from_millis(500),
            force: false,
        }
    }
}

impl StopOptions {
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            max_retries: config.stop_max_retries,
            delay: config.stop_delay(),
            force: false,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Starts and stops the embedded node process
pub struct ProcessSupervisor {
    bridge: Arc<dyn NativeBridge>,
    settings: SharedSettings,
    state: SharedNodeState,
    config: ControllerConfig,
    /// Held for the whole of a start; a second concurrent start is refused
    start_guard: tokio::sync::Mutex<()>,
}

impl ProcessSupervisor {
    pub fn new(
        bridge: Arc<dyn NativeBridge>,
        settings: SharedSettings,
        state: SharedNodeState,
        config: ControllerConfig,
    ) -> Self {
        Self {
            bridge,
            settings,
            state,
            config,
            start_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Configuration the node would be started with right now.
    ///
    /// `tor_enabled` comes from the session being started and overrides the
    /// stored Tor flag, so the `[tor]` section matches the process flag.
    pub fn lnd_config(&self, testnet: bool, tor_enabled: bool) -> LndConfig {
        let mut flags = self.settings.flags();
        flags.tor_enabled = tor_enabled;
        LndConfig {
            testnet,
            neutrino_peers: self.settings.neutrino_peers(testnet),
            flags,
        }
    }

    /// Render and write lnd.conf into the data directory
    pub async fn write_config(&self, lnd_dir: &str, testnet: bool, tor_enabled: bool) -> Result<(), NodeError> {
        let content = self.lnd_config(testnet, tor_enabled).generate();
        self.bridge.write_config(lnd_dir, &content).await?;
        log::info!("lnd.conf written to {}", lnd_dir);
        Ok(())
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start the embedded node for `session`.
    ///
    /// Returns once the native start call succeeded (or the wallet was
    /// found locked and an unlock was attempted). Readiness is observed
    /// separately through the state stream.
    pub async fn start(&self, session: &SupervisorSession) -> Result<(), NodeError> {
        let _guard = self.start_guard.try_lock().map_err(|_| NodeError::Busy)?;

        log::info!(
            "Starting embedded node (dir={}, creation={}, recovery={}, tor={}, testnet={})",
            session.lnd_dir,
            session.is_creation(),
            session.recovery,
            session.tor_enabled,
            session.testnet
        );
        self.state.set_lifecycle(Lifecycle::Starting);
        self.state.set_error(None);

        let result = self.start_session(session).await;
        match result {
            Ok(()) => {
                // The zero-password creation bootstrap never counts as started
                if !session.is_creation() {
                    self.mark_started(true);
                }
                self.state.set_running_since(session.started_at);
            }
            Err(ref err) => {
                log::error!("Failed to start embedded node: {}", err);
                self.state.set_error(Some(err.to_string()));
                self.state.set_lifecycle(Lifecycle::Stopped);
            }
        }
        result
    }

    async fn start_session(&self, session: &SupervisorSession) -> Result<(), NodeError> {
        if self.config.platform.requires_folder_check() && !session.is_creation() && !session.recovery {
            let exists = self.bridge.data_dir_exists(&session.lnd_dir).await?;
            if !exists {
                // Credentials survived an app reinstall, the node data did not
                return Err(NodeError::with_detail(
                    NodeErrorKind::FolderMissing,
                    session.lnd_dir.clone(),
                ));
            }
        }

        self.write_config(&session.lnd_dir, session.testnet, session.tor_enabled)
            .await?;
        let args = self.start_args(session);

        match self.launch(session, &args).await {
            Ok(()) => return Ok(()),
            Err(err) => match err.kind() {
                Some(NodeErrorKind::FolderMissing) => return Err(err),
                Some(NodeErrorKind::WalletLocked) => {
                    self.unlock_after_start(session).await;
                    return Ok(());
                }
                Some(NodeErrorKind::AlreadyRunning) => {
                    log::warn!("Node reports it is already running, forcing a stop first");
                    self.force_stop_and_settle().await;
                }
                _ => log::warn!("Node start failed, retrying: {}", err),
            },
        }

        self.start_with_retries(session, &args).await
    }

    async fn start_with_retries(&self, session: &SupervisorSession, args: &str) -> Result<(), NodeError> {
        let policy = RetrySpec::new(self.config.max_start_retries, self.config.start_retry_delay())
            .should_retry(|err: &NodeError| !err.is_kind(NodeErrorKind::FolderMissing))
            .on_retry(move |_attempt, err: &NodeError| {
                let already_running = err.is_kind(NodeErrorKind::AlreadyRunning);
                async move {
                    if already_running {
                        self.force_stop_and_settle().await;
                    }
                }
                .boxed()
            });

        let result = retry(
            move || async move {
                match self.launch(session, args).await {
                    Err(err) if err.is_kind(NodeErrorKind::WalletLocked) => {
                        self.unlock_after_start(session).await;
                        Ok(())
                    }
                    other => other,
                }
            },
            policy,
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_kind(NodeErrorKind::FolderMissing) => Err(err),
            Err(err) => Err(NodeError::with_detail(NodeErrorKind::StartFailed, err.raw())),
        }
    }

    async fn launch(&self, session: &SupervisorSession, args: &str) -> Result<(), NodeError> {
        self.bridge
            .start_process(args, &session.lnd_dir, session.tor_enabled, session.testnet)
            .await?;
        log::info!("Embedded node process started");

        if args.contains(RESCAN_ARG) {
            if let Err(e) = self.settings.clear_rescan_wallet() {
                log::warn!("Failed to clear rescan flag: {:#}", e);
            }
        }
        Ok(())
    }

    async fn unlock_after_start(&self, session: &SupervisorSession) {
        let Some(password) = session.password() else {
            log::info!("Wallet is locked but no password is available, not unlocking");
            return;
        };

        match self.bridge.unlock_wallet(password).await {
            Ok(()) => log::info!("Wallet unlocked"),
            Err(e) => log::warn!("Unlocking wallet after start failed: {}", e),
        }
    }

    async fn force_stop_and_settle(&self) {
        let options = StopOptions::from_config(&self.config).forced();
        if let Err(e) = self.stop(options).await {
            log::error!("Forced stop failed: {}", e);
        }

        let delay = self.config.cleanup_delay();
        log::info!("Waiting {}ms for process cleanup", delay.as_millis());
        tokio::time::sleep(delay).await;
    }

    fn start_args(&self, session: &SupervisorSession) -> String {
        let mut args = format!("--lnddir={}", session.lnd_dir);
        if self.settings.flags().rescan_wallet {
            log::info!("Rescan requested, wallet transactions will be reset");
            args.push(' ');
            args.push_str(RESCAN_ARG);
        }
        args
    }

    // ========================================================================
    // Stop
    // ========================================================================

    /// Stop the embedded node.
    ///
    /// Safe to call when nothing is running. Errors that are expected while
    /// a node shuts down are logged and treated as success.
    pub async fn stop(&self, options: StopOptions) -> Result<(), NodeError> {
        log::info!("Stopping embedded node (force={})", options.force);

        let result = self.stop_process(options).await;
        match result {
            Ok(()) => {
                self.state.reset_session();
                log::info!("Embedded node stopped");
            }
            Err(ref err) => {
                log::error!("Failed to stop embedded node: {}", err);
                self.state.set_error(Some(err.to_string()));
                if err.is_kind(NodeErrorKind::FailedToStop) {
                    self.state.set_lifecycle(Lifecycle::Running);
                }
            }
        }
        result
    }

    async fn stop_process(&self, options: StopOptions) -> Result<(), NodeError> {
        if !options.force {
            match self.bridge.check_status().await {
                Ok(flags) if !flags.is_running() => {
                    log::info!("Node is not running, nothing to stop");
                    self.mark_started(false);
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if is_stop_expected(e.message()) => {
                    log::info!("Status check says the node is already down: {}", e);
                    self.mark_started(false);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.state.set_lifecycle(Lifecycle::Stopping);
        tolerate_expected("stop", self.bridge.stop_process().await)?;
        tolerate_expected("kill", self.bridge.kill_process().await)?;
        self.mark_started(false);

        for poll in 1..=options.max_retries {
            match self.bridge.check_status().await {
                Ok(flags) if !flags.is_running() => return Ok(()),
                Ok(_) => log::debug!("Node still running (check {}/{})", poll, options.max_retries),
                Err(e) if is_stop_expected(e.message()) => {
                    log::debug!("Status check confirms stop: {}", e);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            if poll < options.max_retries {
                tokio::time::sleep(options.delay).await;
            }
        }

        Err(NodeError::with_detail(
            NodeErrorKind::FailedToStop,
            format!("still running after {} status checks", options.max_retries),
        ))
    }

    fn mark_started(&self, started: bool) {
        self.state.set_embedded_started(started);
        if let Err(e) = self.settings.set_embedded_started(started) {
            log::warn!("Failed to persist embedded started flag: {:#}", e);
        }
    }
}

fn tolerate_expected(call: &str, result: Result<(), BridgeError>) -> Result<(), NodeError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if is_stop_expected(e.message()) => {
            log::info!("Ignoring expected {} error: {}", call, e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
