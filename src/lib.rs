//! Lifecycle and readiness controller for an embedded Lightning node
//!
//! The host application provides a [`node::NativeBridge`] over the embedded
//! runtime and a [`node::SettingsStore`]; [`node::NodeController`] drives
//! everything else.

pub mod logging;
pub mod node;

pub use node::{NodeController, NodeError, NodeErrorKind};
