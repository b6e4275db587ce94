//! Embedded node management
//!
//! This module starts, stops, unlocks and monitors an embedded Lightning
//! node that runs behind a native bridge, and provisions its wallet on
//! first run.
//!
//! ## Features
//!
//! - **Error Classification**: Map raw native error text onto a fixed taxonomy
//! - **Retry**: One bounded retry combinator for every native call site
//! - **Process Supervision**: Start/stop with "already running" reconciliation
//! - **Readiness**: Follow the wallet state stream until RPC is serving
//! - **Wallet Provisioning**: Seed generation with unlocker race recovery
//! - **Peer Optimization**: Pick low-latency neutrino peers for the next start
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       node module                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  controller.rs  - Public operations and wiring            │
//! │  supervisor.rs  - Process lifecycle (start/stop)          │
//! │  readiness.rs   - Wallet state stream and RPC readiness   │
//! │  provisioner.rs - First-run wallet creation               │
//! │  peers.rs       - Neutrino peer latency selection         │
//! │  retry.rs       - Bounded retry with backoff              │
//! │  error.rs       - Error taxonomy and classification       │
//! │  bridge.rs      - Native bridge contract                  │
//! │  events.rs      - Native event hub                        │
//! │  settings.rs    - Persisted user settings                 │
//! │  config.rs      - Controller tunables and lnd.conf        │
//! │  state.rs       - Shared runtime state                    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod bridge;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod peers;
pub mod provisioner;
pub mod readiness;
pub mod retry;
pub mod settings;
pub mod state;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use bridge::{NativeBridge, SyncTracker, WalletState};
pub use config::{ControllerConfig, Platform};
pub use controller::NodeController;
pub use error::{BridgeError, NodeError, NodeErrorKind};
pub use events::{EventHub, SharedEventHub};
pub use provisioner::{CreateWalletParams, CreatedWallet};
pub use readiness::ReadyOutcome;
pub use settings::{JsonSettingsStore, SettingsStore, SharedSettings};
pub use state::{create_node_state, NodeState, NodeStatus, SharedNodeState};
pub use supervisor::StopOptions;
