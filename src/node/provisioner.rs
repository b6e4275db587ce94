//! First-run wallet creation
//!
//! Bootstraps the node without a wallet, obtains a seed (supplied or
//! generated), and initializes the wallet with fresh key entropy.

use super::bridge::{InitWalletRequest, InitWalletResponse, NativeBridge};
use super::config::ControllerConfig;
use super::error::{NodeError, NodeErrorKind};
use super::readiness::ReadinessWatcher;
use super::retry::{retry, RetrySpec};
use super::state::SupervisorSession;
use super::supervisor::{ProcessSupervisor, StopOptions};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::FutureExt;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Bytes of entropy behind the wallet encryption password
const WALLET_ENTROPY_BYTES: usize = 32;

/// Parameters of a wallet creation
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletParams {
    pub lnd_dir: String,
    /// Restore from this mnemonic instead of generating a new seed
    #[serde(default)]
    pub seed_mnemonic: Option<Vec<String>>,
    /// aezeed passphrase protecting the seed
    #[serde(default)]
    pub wallet_passphrase: Option<String>,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub channel_backups_base64: Option<String>,
}

impl CreateWalletParams {
    pub fn new(lnd_dir: impl Into<String>) -> Self {
        Self {
            lnd_dir: lnd_dir.into(),
            ..Default::default()
        }
    }

    /// Whether an existing wallet is being restored
    pub fn is_restore(&self) -> bool {
        self.seed_mnemonic.is_some() || self.wallet_passphrase.is_some()
    }
}

/// Result of a successful wallet creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWallet {
    pub wallet: InitWalletResponse,
    pub seed: Vec<String>,
    /// Base64 of the wallet password entropy; the caller stores it securely
    pub random_base64: String,
}

pub struct WalletProvisioner {
    bridge: Arc<dyn NativeBridge>,
    supervisor: Arc<ProcessSupervisor>,
    watcher: Arc<ReadinessWatcher>,
    config: ControllerConfig,
}

impl WalletProvisioner {
    pub fn new(
        bridge: Arc<dyn NativeBridge>,
        supervisor: Arc<ProcessSupervisor>,
        watcher: Arc<ReadinessWatcher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            bridge,
            supervisor,
            watcher,
            config,
        }
    }

    /// Create (or restore) the wallet of a node that has none yet
    pub async fn create_wallet(&self, params: &CreateWalletParams) -> Result<CreatedWallet, NodeError> {
        let lnd_dir = params.lnd_dir.as_str();
        log::info!(
            "Creating wallet (dir={}, testnet={}, restore={})",
            lnd_dir,
            params.testnet,
            params.is_restore()
        );

        if self.config.platform.requires_directory_setup() {
            self.bridge.prepare_directories(lnd_dir).await?;
        }
        self.supervisor.write_config(lnd_dir, params.testnet, false).await?;
        self.bridge.initialize(lnd_dir).await?;

        let session = SupervisorSession::creation(lnd_dir, params.testnet).with_recovery(params.seed_mnemonic.is_some());
        self.supervisor.start(&session).await?;
        self.watcher.wait_for_ready(&session).await.into_result()?;

        let seed = match params.seed_mnemonic {
            Some(ref mnemonic) => {
                log::info!("Using supplied seed ({} words)", mnemonic.len());
                mnemonic.clone()
            }
            None => self.generate_seed(&session).await?,
        };

        let random_base64 = wallet_entropy();
        let request = InitWalletRequest {
            mnemonic: seed.clone(),
            password: random_base64.clone(),
            recovery_window: params.is_restore().then_some(self.config.restore_recovery_window),
            channel_backups: params.channel_backups_base64.clone(),
            aezeed_passphrase: params.wallet_passphrase.clone(),
        };

        let wallet = self.bridge.init_wallet(request).await?;
        log::info!("Wallet initialized");

        Ok(CreatedWallet {
            wallet,
            seed,
            random_base64,
        })
    }

    /// Generate a seed, restarting the node when the unlocker service races us
    async fn generate_seed(&self, session: &SupervisorSession) -> Result<Vec<String>, NodeError> {
        let policy = RetrySpec::new(self.config.gen_seed_max_retries, self.config.gen_seed_retry_delay())
            .should_retry(|err: &NodeError| err.is_kind(NodeErrorKind::GenSeedUnlockedRace))
            .on_retry(move |attempt, _err: &NodeError| self.restart_for_wallet_creation(session, attempt).boxed());

        let result = retry(
            move || async move { self.bridge.generate_seed().await.map_err(NodeError::from_bridge) },
            policy,
        )
        .await;

        match result {
            Ok(seed) => Ok(seed),
            Err(err) if err.is_kind(NodeErrorKind::GenSeedUnlockedRace) => {
                Err(NodeError::with_detail(NodeErrorKind::WalletCreationRace, err.raw()))
            }
            Err(err) => Err(NodeError::with_detail(NodeErrorKind::GenSeedFailed, err.raw())),
        }
    }

    /// Stop, wait, start and wait for the node to come back without a wallet
    async fn restart_for_wallet_creation(&self, session: &SupervisorSession, attempt: u32) {
        log::warn!("Restarting node for wallet creation (attempt {})", attempt);

        if let Err(e) = self.supervisor.stop(StopOptions::from_config(&self.config)).await {
            log::error!("Stop before wallet creation restart failed: {}", e);
        }
        tokio::time::sleep(self.config.gen_seed_restart_delay(attempt)).await;

        if let Err(e) = self.supervisor.start(session).await {
            log::error!("Restart for wallet creation failed: {}", e);
            return;
        }
        if let Err(e) = self.watcher.wait_for_ready(session).await.into_result() {
            log::error!("Node did not come back for wallet creation: {}", e);
        }
    }
}

fn wallet_entropy() -> String {
    let mut bytes = [0u8; WALLET_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}
