//! Event emission: every tier action is both logged via `tracing` and
//! fanned out to any subscriber that wants to observe it programmatically.
//!
//! Each emitted event gets two simultaneous faces: a `tracing` log line for
//! humans and operators, and a typed broadcast message for any in-process
//! subscriber that wants to react programmatically.

use tracing::{debug, info, warn};

/// A named event, mirroring the set this library emits: `set`, `get`, `del`,
/// `info`, `warn`, `wait`.
#[derive(Debug, Clone)]
pub enum Event {
    Set { key: String },
    Get { key: String, hit: bool },
    Del { key: String },
    Info(String),
    Warn { message: String, details: Option<String> },
    Wait { acknowledged: usize },
}

/// Broadcast-based fan-out. Cloning an `EventBus` shares the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(256);
        Self { sender }
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to future events. Past events are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    fn publish(&self, event: Event) {
        // A lagging/absent receiver is not an error for an advisory bus.
        let _ = self.sender.send(event);
    }

    pub fn emit_set(&self, key: &str) {
        debug!(%key, "set");
        self.publish(Event::Set { key: key.to_string() });
    }

    pub fn emit_get(&self, key: &str, hit: bool) {
        debug!(%key, hit, "get");
        self.publish(Event::Get { key: key.to_string(), hit });
    }

    pub fn emit_del(&self, key: &str) {
        debug!(%key, "del");
        self.publish(Event::Del { key: key.to_string() });
    }

    pub fn emit_info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.publish(Event::Info(message));
    }

    pub fn emit_warn(&self, message: impl Into<String>, details: Option<String>) {
        let message = message.into();
        match &details {
            Some(d) => warn!(details = %d, "{}", message),
            None => warn!("{}", message),
        }
        self.publish(Event::Warn { message, details });
    }

    pub fn emit_wait(&self, acknowledged: usize) {
        debug!(acknowledged, "wait");
        self.publish(Event::Wait { acknowledged });
    }
}
