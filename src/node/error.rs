//! Error taxonomy for the embedded node
//!
//! The native bridge only ever reports free text. This module is the one
//! place where that text is recognized and turned into a closed set of
//! [`NodeErrorKind`]s; everything above it decides retries and shutdown
//! handling by kind, never by message.

use serde::Serialize;
use thiserror::Error;

/// Error raised by a call across the native bridge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BridgeError {
    message: String,
}

impl BridgeError {
    /// Create a bridge error from the raw native message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The raw native message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for BridgeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for BridgeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Closed set of failure modes of the embedded node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeErrorKind {
    FolderMissing,
    WalletCreationRace,
    RpcConnectionClosed,
    RpcReadyTimeout,
    FailedToStop,
    StartFailed,
    GenSeedFailed,
    ReadyTimeout,
    AlreadyRunning,
    WalletLocked,
    MacaroonStoreLocked,
    GenSeedUnlockedRace,
    RpcNotReady,
    StopExpected,
    StreamInvalidResponse,
    StreamEof,
}

/// Kinds that are the normal outcome of tearing the node down
pub const STOP_EXPECTED_SET: &[NodeErrorKind] = &[
    NodeErrorKind::StopExpected,
    NodeErrorKind::WalletLocked,
    NodeErrorKind::RpcConnectionClosed,
    NodeErrorKind::FolderMissing,
    NodeErrorKind::RpcNotReady,
];

/// Kinds that clear up on their own while the node is coming up
pub const TRANSIENT_RETRYABLE_SET: &[NodeErrorKind] = &[
    NodeErrorKind::RpcConnectionClosed,
    NodeErrorKind::RpcNotReady,
    NodeErrorKind::MacaroonStoreLocked,
];

impl NodeErrorKind {
    /// All kinds, in classification order
    pub const ALL: [NodeErrorKind; 16] = [
        NodeErrorKind::FolderMissing,
        NodeErrorKind::WalletCreationRace,
        NodeErrorKind::RpcConnectionClosed,
        NodeErrorKind::RpcReadyTimeout,
        NodeErrorKind::FailedToStop,
        NodeErrorKind::StartFailed,
        NodeErrorKind::GenSeedFailed,
        NodeErrorKind::ReadyTimeout,
        NodeErrorKind::AlreadyRunning,
        NodeErrorKind::WalletLocked,
        NodeErrorKind::MacaroonStoreLocked,
        NodeErrorKind::GenSeedUnlockedRace,
        NodeErrorKind::RpcNotReady,
        NodeErrorKind::StopExpected,
        NodeErrorKind::StreamInvalidResponse,
        NodeErrorKind::StreamEof,
    ];

    /// Fixed user-facing message
    pub fn message(&self) -> &'static str {
        match self {
            NodeErrorKind::FolderMissing => {
                "The lnd data folder is missing. This usually happens after the app was reinstalled; restore your wallet from its seed"
            }
            NodeErrorKind::WalletCreationRace => {
                "The node shut down its wallet unlocker while the seed was being generated. Please try creating the wallet again"
            }
            NodeErrorKind::RpcConnectionClosed => "The connection to the node was closed",
            NodeErrorKind::RpcReadyTimeout => "The node RPC did not become ready in time",
            NodeErrorKind::FailedToStop => "The node failed to stop",
            NodeErrorKind::StartFailed => "The node failed to start",
            NodeErrorKind::GenSeedFailed => "Failed to generate a wallet seed",
            NodeErrorKind::ReadyTimeout => "Timed out waiting for the node to become ready",
            NodeErrorKind::AlreadyRunning => "The node is already running",
            NodeErrorKind::WalletLocked => "The wallet is locked",
            NodeErrorKind::MacaroonStoreLocked => "The macaroon store is locked",
            NodeErrorKind::GenSeedUnlockedRace => "The wallet was unlocked before the seed could be generated",
            NodeErrorKind::RpcNotReady => "The node RPC server is still starting up",
            NodeErrorKind::StopExpected => "The node is not running",
            NodeErrorKind::StreamInvalidResponse => "The node sent an invalid state update",
            NodeErrorKind::StreamEof => "The node state stream ended",
        }
    }

    /// Raw substrings that identify this kind in bridge error text.
    ///
    /// Kinds with no patterns are only ever produced by the controller itself.
    pub fn patterns(&self) -> &'static [&'static str] {
        match self {
            NodeErrorKind::FolderMissing => &[
                "lnd folder missing",
                "lnd directory missing",
                "lnddir does not exist",
            ],
            NodeErrorKind::RpcConnectionClosed => &[
                "grpc connection closed",
                "error reading from server: connection",
                "transport is closing",
                "connection closed",
            ],
            NodeErrorKind::AlreadyRunning => &["lnd already started", "already running"],
            NodeErrorKind::WalletLocked => &["wallet locked", "wallet is locked"],
            NodeErrorKind::MacaroonStoreLocked => &["macaroon store is locked"],
            NodeErrorKind::GenSeedUnlockedRace => &[
                "unknown service lnrpc.walletunlocker",
                "walletunlocker service is no longer available",
            ],
            NodeErrorKind::RpcNotReady => &[
                "starting up",
                "server is still in the process of starting",
                "waiting to start",
            ],
            NodeErrorKind::StopExpected => &[
                "connection refused",
                "lnd not running",
                "lnd is not running",
                "no connection established",
            ],
            NodeErrorKind::StreamInvalidResponse => &["invalid response"],
            NodeErrorKind::StreamEof => &[
                "EOF",
                "error reading from server: EOF",
                "channel event store shutting down",
            ],
            NodeErrorKind::WalletCreationRace
            | NodeErrorKind::RpcReadyTimeout
            | NodeErrorKind::FailedToStop
            | NodeErrorKind::StartFailed
            | NodeErrorKind::GenSeedFailed
            | NodeErrorKind::ReadyTimeout => &[],
        }
    }

    /// Whether `raw` contains one of this kind's patterns (case-insensitive).
    ///
    /// Single-word patterns such as `EOF` only match as a whole word.
    pub fn matches(&self, raw: &str) -> bool {
        let haystack = raw.to_lowercase();
        self.patterns()
            .iter()
            .any(|pattern| contains_pattern(&haystack, &pattern.to_lowercase()))
    }

    pub fn is_stop_expected(&self) -> bool {
        STOP_EXPECTED_SET.contains(self)
    }

    pub fn is_transient_retryable(&self) -> bool {
        TRANSIENT_RETRYABLE_SET.contains(self)
    }
}

fn contains_pattern(haystack: &str, pattern: &str) -> bool {
    if pattern.contains(char::is_whitespace) {
        return haystack.contains(pattern);
    }

    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(pattern).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + pattern.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

impl std::fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

// ============================================================================
// Classification
// ============================================================================

/// First kind, in enumeration order, whose patterns match `raw`
pub fn classify(raw: &str) -> Option<NodeErrorKind> {
    NodeErrorKind::ALL.into_iter().find(|kind| kind.matches(raw))
}

/// Same matching as [`classify`], restricted to one kind
pub fn matches_kind(raw: &str, kind: NodeErrorKind) -> bool {
    kind.matches(raw)
}

/// True if `raw` matches any kind that is normal during shutdown
pub fn is_stop_expected(raw: &str) -> bool {
    STOP_EXPECTED_SET.iter().any(|kind| kind.matches(raw))
}

/// True if `raw` matches any kind that is worth retrying
pub fn is_transient_retryable(raw: &str) -> bool {
    TRANSIENT_RETRYABLE_SET.iter().any(|kind| kind.matches(raw))
}

// ============================================================================
// Controller error
// ============================================================================

/// Error returned by every controller operation
#[derive(Debug, Error)]
pub enum NodeError {
    /// A recognized failure, with the raw bridge text when there was one
    #[error("{}", render(.kind, .detail))]
    Classified {
        kind: NodeErrorKind,
        detail: Option<String>,
    },

    /// Bridge text that matched no known pattern, passed through unchanged
    #[error("{0}")]
    Native(String),

    /// The settings collaborator failed to read or persist
    #[error("Settings error: {0}")]
    Settings(String),

    /// `start()` was called while a previous start is still in flight
    #[error("A node start is already in progress")]
    Busy,

    /// Restart or readiness was requested before any node was started
    #[error("No node session has been started")]
    NoSession,
}

fn render(kind: &NodeErrorKind, detail: &Option<String>) -> String {
    match detail {
        Some(detail) if !detail.is_empty() => format!("{}: {}", kind.message(), detail),
        _ => kind.message().to_string(),
    }
}

impl NodeError {
    /// A classified error with no raw detail
    pub fn kind_only(kind: NodeErrorKind) -> Self {
        NodeError::Classified { kind, detail: None }
    }

    /// A classified error carrying extra diagnostic text
    pub fn with_detail(kind: NodeErrorKind, detail: impl Into<String>) -> Self {
        NodeError::Classified {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// Classify a bridge failure; unknown text passes through as [`NodeError::Native`]
    pub fn from_bridge(err: BridgeError) -> Self {
        match classify(err.message()) {
            Some(kind) => NodeError::Classified {
                kind,
                detail: Some(err.message),
            },
            None => NodeError::Native(err.message),
        }
    }

    /// The classified kind, if this error has one
    pub fn kind(&self) -> Option<NodeErrorKind> {
        match self {
            NodeError::Classified { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_kind(&self, kind: NodeErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    /// The raw text of this error, used for re-matching patterns
    pub fn raw(&self) -> String {
        match self {
            NodeError::Classified {
                detail: Some(detail),
                ..
            } => detail.clone(),
            other => other.to_string(),
        }
    }
}

impl From<BridgeError> for NodeError {
    fn from(err: BridgeError) -> Self {
        NodeError::from_bridge(err)
    }
}

impl From<anyhow::Error> for NodeError {
    fn from(err: anyhow::Error) -> Self {
        NodeError::Settings(format!("{:#}", err))
    }
}
