//! Contracts for the native node runtime
//!
//! The embedded node lives behind a platform bridge (a JNI service on
//! Android, a framework on iOS, a library on desktop). The controller only
//! sees the narrow surface below; every method may fail with free text that
//! is classified by [`super::error`].

use super::error::BridgeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Status flag: the platform service hosting the node is bound
pub const STATUS_SERVICE_BOUND: u32 = 1;
/// Status flag: the node process has been started
pub const STATUS_PROCESS_STARTED: u32 = 2;
/// Status flag: the wallet has been unlocked
pub const STATUS_WALLET_UNLOCKED: u32 = 4;

/// Bitmask returned by the native status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    pub fn is_service_bound(&self) -> bool {
        self.0 & STATUS_SERVICE_BOUND == STATUS_SERVICE_BOUND
    }

    /// Whether the node process is running
    pub fn is_running(&self) -> bool {
        self.0 & STATUS_PROCESS_STARTED == STATUS_PROCESS_STARTED
    }

    pub fn is_wallet_unlocked(&self) -> bool {
        self.0 & STATUS_WALLET_UNLOCKED == STATUS_WALLET_UNLOCKED
    }
}

/// Wallet state reported by the node's state stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WalletState {
    NonExisting,
    Locked,
    Unlocked,
    RpcActive,
    ServerActive,
    WaitingToStart,
    /// A state code this controller does not know about
    Unknown(i32),
}

impl WalletState {
    /// Map the node's numeric state code
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => WalletState::NonExisting,
            1 => WalletState::Locked,
            2 => WalletState::Unlocked,
            3 => WalletState::RpcActive,
            4 => WalletState::ServerActive,
            255 => WalletState::WaitingToStart,
            other => WalletState::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            WalletState::NonExisting => 0,
            WalletState::Locked => 1,
            WalletState::Unlocked => 2,
            WalletState::RpcActive => 3,
            WalletState::ServerActive => 4,
            WalletState::WaitingToStart => 255,
            WalletState::Unknown(code) => *code,
        }
    }

    /// The RPC server accepts calls in this state
    pub fn is_rpc_ready(&self) -> bool {
        matches!(self, WalletState::RpcActive | WalletState::ServerActive)
    }
}

/// Result of the node's `GetInfo` call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub identity_pubkey: String,
    pub block_height: u32,
    pub block_hash: String,
    #[serde(default)]
    pub synced_to_chain: bool,
}

/// Arguments of the native wallet initialization
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitWalletRequest {
    pub mnemonic: Vec<String>,
    /// Base64 wallet encryption key
    pub password: String,
    pub recovery_window: Option<u32>,
    /// Base64 multi-channel backup to restore
    pub channel_backups: Option<String>,
    pub aezeed_passphrase: Option<String>,
}

/// Result of the native wallet initialization
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitWalletResponse {
    /// Serialized admin macaroon, empty if the runtime does not return one
    #[serde(default)]
    pub admin_macaroon: Vec<u8>,
}

/// Narrow contract over the embedded node runtime
#[async_trait]
pub trait NativeBridge: Send + Sync {
    /// Load the runtime for a data directory
    async fn initialize(&self, lnd_dir: &str) -> Result<(), BridgeError>;

    /// Whether the data directory exists on disk
    async fn data_dir_exists(&self, lnd_dir: &str) -> Result<bool, BridgeError>;

    /// Create platform directories and exclude them from cloud backup
    async fn prepare_directories(&self, lnd_dir: &str) -> Result<(), BridgeError>;

    async fn write_config(&self, lnd_dir: &str, config: &str) -> Result<(), BridgeError>;

    async fn start_process(
        &self,
        args: &str,
        lnd_dir: &str,
        tor_enabled: bool,
        testnet: bool,
    ) -> Result<(), BridgeError>;

    /// Ask the node to shut down gracefully
    async fn stop_process(&self) -> Result<(), BridgeError>;

    /// Kill the node process
    async fn kill_process(&self) -> Result<(), BridgeError>;

    async fn check_status(&self) -> Result<StatusFlags, BridgeError>;

    /// Start emitting state updates on [`super::events::STATE_EVENT`]
    async fn subscribe_state(&self) -> Result<(), BridgeError>;

    /// Decode the payload of a state update
    fn decode_state_event(&self, data: &[u8]) -> Result<WalletState, BridgeError>;

    async fn unlock_wallet(&self, password: &str) -> Result<(), BridgeError>;

    async fn generate_seed(&self) -> Result<Vec<String>, BridgeError>;

    async fn init_wallet(&self, request: InitWalletRequest) -> Result<InitWalletResponse, BridgeError>;

    async fn get_info(&self) -> Result<NodeInfo, BridgeError>;
}

/// Chain sync tracking owned by the wallet store
#[async_trait]
pub trait SyncTracker: Send + Sync {
    fn is_syncing(&self) -> bool;

    async fn start(&self);
}
