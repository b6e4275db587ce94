//! Settings collaborator
//!
//! The controller never reaches into the app's settings store directly; it
//! is handed a [`SettingsStore`] with the handful of reads and writes it
//! needs. [`JsonSettingsStore`] is the file-backed implementation.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Fee estimates served to neutrino wallets
pub const DEFAULT_FEE_ESTIMATOR_URL: &str =
    "https://nodes.lightning.computer/fees/v1/btc-fee-estimates.json";

/// Default Tor SOCKS port of the embedded Tor daemon
pub const DEFAULT_TOR_SOCKS_PORT: u16 = 9070;

/// Mission control estimator used by the router
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RouterEstimator {
    #[default]
    Apriori,
    Bimodal,
}

impl RouterEstimator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouterEstimator::Apriori => "apriori",
            RouterEstimator::Bimodal => "bimodal",
        }
    }
}

/// Flags read by the supervisor when building a start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFlags {
    pub tor_enabled: bool,
    pub tor_socks_port: u16,
    pub rescan_wallet: bool,
    pub dont_allow_other_peers: bool,
    pub fee_estimator_url: String,
    pub router_estimator: RouterEstimator,
}

/// Read/write capability over persisted node settings
pub trait SettingsStore: Send + Sync {
    fn neutrino_peers(&self, testnet: bool) -> Vec<String>;

    fn set_neutrino_peers(&self, testnet: bool, peers: Vec<String>) -> anyhow::Result<()>;

    fn flags(&self) -> NodeFlags;

    fn set_dont_allow_other_peers(&self, value: bool) -> anyhow::Result<()>;

    /// Clear the one-shot "rescan on next start" flag
    fn clear_rescan_wallet(&self) -> anyhow::Result<()>;

    fn set_embedded_started(&self, started: bool) -> anyhow::Result<()>;
}

/// Shared settings capability
pub type SharedSettings = Arc<dyn SettingsStore>;

/// Persisted node settings (settings.json)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSettings {
    #[serde(default)]
    pub neutrino_peers: Vec<String>,

    #[serde(default)]
    pub testnet_neutrino_peers: Vec<String>,

    #[serde(default)]
    pub tor_enabled: bool,

    #[serde(default = "default_tor_socks_port")]
    pub tor_socks_port: u16,

    #[serde(default)]
    pub rescan_wallet: bool,

    #[serde(default)]
    pub dont_allow_other_peers: bool,

    #[serde(default = "default_fee_estimator_url")]
    pub fee_estimator_url: String,

    #[serde(default)]
    pub router_estimator: RouterEstimator,

    /// Last known embedded-node started flag
    #[serde(default)]
    pub embedded_started: bool,
}

fn default_tor_socks_port() -> u16 {
    DEFAULT_TOR_SOCKS_PORT
}

fn default_fee_estimator_url() -> String {
    DEFAULT_FEE_ESTIMATOR_URL.to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            neutrino_peers: Vec::new(),
            testnet_neutrino_peers: Vec::new(),
            tor_enabled: false,
            tor_socks_port: default_tor_socks_port(),
            rescan_wallet: false,
            dont_allow_other_peers: false,
            fee_estimator_url: default_fee_estimator_url(),
            router_estimator: RouterEstimator::default(),
            embedded_started: false,
        }
    }
}

/// Settings kept in memory and, unless ephemeral, mirrored to a JSON file
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: Option<PathBuf>,
    settings: Mutex<NodeSettings>,
}

impl JsonSettingsStore {
    /// Default location of settings.json
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lnd-supervisor")
            .join("settings.json")
    }

    /// Load from `path`; a missing or unreadable file yields defaults
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let settings = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("Ignoring corrupt settings at {}: {}", path.display(), e);
                NodeSettings::default()
            }),
            Err(_) => NodeSettings::default(),
        };

        Self {
            path: Some(path),
            settings: Mutex::new(settings),
        }
    }

    /// Settings that are never written to disk
    pub fn ephemeral(settings: NodeSettings) -> Self {
        Self {
            path: None,
            settings: Mutex::new(settings),
        }
    }

    pub fn snapshot(&self) -> NodeSettings {
        self.lock().clone()
    }

    /// Apply `f` and persist the result
    pub fn update<F>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut NodeSettings),
    {
        let mut settings = self.lock();
        f(&mut settings);
        self.save(&settings)
    }

    fn save(&self, settings: &NodeSettings) -> anyhow::Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings dir {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(settings).context("Failed to serialize settings")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;

        log::debug!("Settings saved to {}", path.display());
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn neutrino_peers(&self, testnet: bool) -> Vec<String> {
        let settings = self.lock();
        if testnet {
            settings.testnet_neutrino_peers.clone()
        } else {
            settings.neutrino_peers.clone()
        }
    }

    fn set_neutrino_peers(&self, testnet: bool, peers: Vec<String>) -> anyhow::Result<()> {
        self.update(|s| {
            if testnet {
                s.testnet_neutrino_peers = peers;
            } else {
                s.neutrino_peers = peers;
            }
        })
    }

    fn flags(&self) -> NodeFlags {
        let settings = self.lock();
        NodeFlags {
            tor_enabled: settings.tor_enabled,
            tor_socks_port: settings.tor_socks_port,
            rescan_wallet: settings.rescan_wallet,
            dont_allow_other_peers: settings.dont_allow_other_peers,
            fee_estimator_url: settings.fee_estimator_url.clone(),
            router_estimator: settings.router_estimator,
        }
    }

    fn set_dont_allow_other_peers(&self, value: bool) -> anyhow::Result<()> {
        self.update(|s| s.dont_allow_other_peers = value)
    }

    fn clear_rescan_wallet(&self) -> anyhow::Result<()> {
        self.update(|s| s.rescan_wallet = false)
    }

    fn set_embedded_started(&self, started: bool) -> anyhow::Result<()> {
        self.update(|s| s.embedded_started = started)
    }
}
