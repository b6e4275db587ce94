//! Controller configuration and lnd.conf generation
//!
//! Loads and saves controller tunables and renders the
//! configuration text the embedded node is started with.

use super::settings::NodeFlags;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mainnet neutrino peers used when nothing better is configured
pub const DEFAULT_NEUTRINO_PEERS: &[&str] = &[
    "btcd-mainnet.lightning.computer",
    "node.eldamar.icu",
    "noad.sathoarder.com",
];

/// Testnet neutrino peers used when nothing better is configured
pub const DEFAULT_TESTNET_NEUTRINO_PEERS: &[&str] = &["testnet.lightning.computer"];

/// Platform hosting the embedded node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Desktop,
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl Platform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        #[cfg(target_os = "android")]
        {
            Platform::Android
        }

        #[cfg(target_os = "ios")]
        {
            Platform::Ios
        }

        #[cfg(not(any(target_os = "android", target_os = "ios")))]
        {
            Platform::Desktop
        }
    }

    /// App reinstalls wipe the data directory but keep keychain credentials
    pub fn requires_folder_check(&self) -> bool {
        matches!(self, Platform::Ios)
    }

    /// Data directories must be created and excluded from cloud backup
    pub fn requires_directory_setup(&self) -> bool {
        matches!(self, Platform::Ios | Platform::Desktop)
    }
}

/// Tunables of the lifecycle controller (controller.json)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    pub platform: Platform,

    /// Native start attempts after the first start failed
    pub max_start_retries: u32,
    pub start_retry_delay_ms: u64,

    /// Wait after a forced stop on platforms with fast process teardown
    pub cleanup_delay_ms: u64,
    /// Wait after a forced stop on Android, where the node runs in a service
    pub android_cleanup_delay_ms: u64,

    pub stop_max_retries: u32,
    pub stop_delay_ms: u64,

    /// Wait between registering the state listener and subscribing
    pub listener_settle_ms: u64,
    /// Wait after the node reports a non-existing wallet
    pub non_existing_settle_ms: u64,
    pub rpc_ready_timeout_ms: u64,
    pub rpc_poll_interval_ms: u64,
    pub ready_timeout_ms: u64,

    pub gen_seed_max_retries: u32,
    pub gen_seed_retry_delay_ms: u64,
    /// Base wait inside the restart cycle between seed attempts
    pub gen_seed_restart_delay_ms: u64,

    /// Address lookahead when restoring an existing seed
    pub restore_recovery_window: u32,

    pub ping_timeout_ms: u64,
    pub optimal_latency_ms: u64,
    pub lax_latency_ms: u64,
    pub threshold_latency_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            platform: Platform::current(),
            max_start_retries: 3,
            start_retry_delay_ms: 1000,
            cleanup_delay_ms: 1000,
            android_cleanup_delay_ms: 3000,
            stop_max_retries: 10,
            stop_delay_ms: 500,
            listener_settle_ms: 500,
            non_existing_settle_ms: 1000,
            rpc_ready_timeout_ms: 30_000,
            rpc_poll_interval_ms: 1000,
            ready_timeout_ms: 60_000,
            gen_seed_max_retries: 3,
            gen_seed_retry_delay_ms: 1000,
            gen_seed_restart_delay_ms: 2000,
            restore_recovery_window: 2500,
            ping_timeout_ms: 1500,
            optimal_latency_ms: 50,
            lax_latency_ms: 100,
            threshold_latency_ms: 150,
        }
    }
}

impl ControllerConfig {
    /// Get the path to the controller config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lnd-supervisor")
            .join("controller.json")
    }

    /// Load config from disk, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; a missing or corrupt file yields the defaults
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Wait after a forced stop before the process may be started again
    pub fn cleanup_delay(&self) -> Duration {
        match self.platform {
            Platform::Android => Duration::from_millis(self.android_cleanup_delay_ms),
            _ => Duration::from_millis(self.cleanup_delay_ms),
        }
    }

    pub fn start_retry_delay(&self) -> Duration {
        Duration::from_millis(self.start_retry_delay_ms)
    }

    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }

    pub fn listener_settle(&self) -> Duration {
        Duration::from_millis(self.listener_settle_ms)
    }

    pub fn non_existing_settle(&self) -> Duration {
        Duration::from_millis(self.non_existing_settle_ms)
    }

    pub fn rpc_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_ready_timeout_ms)
    }

    pub fn rpc_poll_interval(&self) -> Duration {
        Duration::from_millis(self.rpc_poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn gen_seed_retry_delay(&self) -> Duration {
        Duration::from_millis(self.gen_seed_retry_delay_ms)
    }

    /// Wait before relaunching the node after a seed generation race
    pub fn gen_seed_restart_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.gen_seed_restart_delay_ms + u64::from(attempt) * 1000)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

/// Inputs of lnd.conf
#[derive(Debug, Clone)]
pub struct LndConfig {
    pub testnet: bool,
    pub neutrino_peers: Vec<String>,
    pub flags: NodeFlags,
}

impl LndConfig {
    /// Peers to inject; falls back to the built-in list when none are stored
    pub fn effective_peers(&self) -> Vec<String> {
        if !self.neutrino_peers.is_empty() {
            return self.neutrino_peers.clone();
        }
        let defaults = if self.testnet {
            DEFAULT_TESTNET_NEUTRINO_PEERS
        } else {
            DEFAULT_NEUTRINO_PEERS
        };
        defaults.iter().map(|p| p.to_string()).collect()
    }

    /// Generate lnd.conf content
    pub fn generate(&self) -> String {
        let mut lines = vec![
            "[Application Options]".to_string(),
            "debuglevel=info".to_string(),
            "maxbackoff=2s".to_string(),
            "sync-freelist=1".to_string(),
            "accept-keysend=1".to_string(),
            "tlsdisableautofill=1".to_string(),
            "maxpendingchannels=1000".to_string(),
            "max-commit-fee-rate-anchors=300".to_string(),
            "".to_string(),
            "[db]".to_string(),
            "db.backend=bolt".to_string(),
            "db.no-graph-cache=false".to_string(),
            "".to_string(),
            "[Routing]".to_string(),
            "routing.assumechanvalid=1".to_string(),
            "".to_string(),
            "[Bitcoin]".to_string(),
            "bitcoin.active=1".to_string(),
        ];

        if self.testnet {
            lines.push("bitcoin.testnet=1".to_string());
        } else {
            lines.push("bitcoin.mainnet=1".to_string());
        }
        lines.push("bitcoin.node=neutrino".to_string());
        lines.push("".to_string());

        // connect= pins the node to these peers, addpeer= only seeds it
        let peer_key = if self.flags.dont_allow_other_peers {
            "neutrino.connect"
        } else {
            "neutrino.addpeer"
        };
        lines.push("[Neutrino]".to_string());
        for peer in self.effective_peers() {
            lines.push(format!("{}={}", peer_key, peer));
        }
        lines.push(format!("neutrino.feeurl={}", self.flags.fee_estimator_url));
        lines.push("neutrino.broadcasttimeout=11s".to_string());
        lines.push("neutrino.persistfilters=true".to_string());
        lines.push("".to_string());

        lines.push("[autopilot]".to_string());
        lines.push("autopilot.active=0".to_string());
        lines.push("autopilot.private=1".to_string());
        lines.push("autopilot.minconfs=1".to_string());
        lines.push("autopilot.conftarget=3".to_string());
        lines.push("autopilot.allocation=1.0".to_string());
        lines.push("autopilot.heuristic=externalscore:0.95".to_string());
        lines.push("autopilot.heuristic=preferential:0.05".to_string());
        lines.push("".to_string());

        lines.push("[protocol]".to_string());
        lines.push("protocol.wumbo-channels=true".to_string());
        lines.push("protocol.option-scid-alias=true".to_string());
        lines.push("protocol.zero-conf=true".to_string());
        lines.push("".to_string());

        lines.push("[routerrpc]".to_string());
        lines.push(format!("routerrpc.estimator={}", self.flags.router_estimator.as_str()));

        if self.flags.tor_enabled {
            lines.push("".to_string());
            lines.push("[tor]".to_string());
            lines.push("tor.active=true".to_string());
            lines.push(format!("tor.socks=127.0.0.1:{}", self.flags.tor_socks_port));
            lines.push("tor.dns=soa.nodes.lightning.directory:53".to_string());
            lines.push("tor.v3=true".to_string());
        }

        lines.join("\n")
    }
}
