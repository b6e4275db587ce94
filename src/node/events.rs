//! Native event delivery
//!
//! The bridge emits named events from its own threads. Each event name has
//! at most one listener; registering a new one drops the previous listener,
//! which then sees its channel close.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Event name of the wallet state stream
pub const STATE_EVENT: &str = "SubscribeState";

/// Raw event as delivered by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
}

impl NativeEvent {
    pub fn with_data(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn with_error(code: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_desc: Some(desc.into()),
            data: None,
        }
    }

    /// Error text of the event, if it carries one
    pub fn error_text(&self) -> Option<String> {
        match (&self.error_desc, &self.error_code) {
            (Some(desc), _) if !desc.is_empty() => Some(desc.clone()),
            (_, Some(code)) if !code.is_empty() => Some(code.clone()),
            _ => None,
        }
    }
}

/// An active registration for one event name
#[derive(Debug)]
pub struct Listener {
    pub id: u64,
    pub receiver: mpsc::UnboundedReceiver<NativeEvent>,
}

#[derive(Debug)]
struct Registration {
    id: u64,
    sender: mpsc::UnboundedSender<NativeEvent>,
}

/// Process-wide event emitter shared by the bridge and the controller
#[derive(Debug, Default)]
pub struct EventHub {
    listeners: Mutex<HashMap<String, Registration>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, replacing any previous one for `name`
    pub fn listen(&self, name: &str) -> Listener {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = self
            .lock()
            .insert(name.to_string(), Registration { id, sender });
        if let Some(previous) = previous {
            log::debug!("Replaced listener {} for {}", previous.id, name);
        }

        Listener { id, receiver }
    }

    /// Remove the listener for `name` if it is still `id`
    pub fn remove_listener(&self, name: &str, id: u64) -> bool {
        let mut listeners = self.lock();
        match listeners.get(name) {
            Some(registration) if registration.id == id => {
                listeners.remove(name);
                true
            }
            _ => false,
        }
    }

    pub fn has_listener(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Deliver an event; returns false if nobody is listening
    pub fn emit(&self, name: &str, event: NativeEvent) -> bool {
        let mut listeners = self.lock();
        let delivered = match listeners.get(name) {
            Some(registration) => registration.sender.send(event).is_ok(),
            None => return false,
        };
        if !delivered {
            listeners.remove(name);
        }
        delivered
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Registration>> {
        // A poisoned map is still structurally valid
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Shared handle to the event hub
pub type SharedEventHub = Arc<EventHub>;
