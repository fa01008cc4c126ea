//! Single-flight gate.
//!
//! At most one generation runs per scope. A trigger that finds its scope
//! busy is dropped, not queued. The permit is released when it is dropped,
//! so every exit path of a session frees the scope.

use koboldcord_config::FlightScope;
use koboldcord_core::channel::ChannelId;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

const GLOBAL_KEY: &str = "*";

type BusySet = Arc<Mutex<HashSet<String>>>;

fn lock(busy: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Tracks which scopes have a generation in flight.
#[derive(Debug, Clone, Default)]
pub struct FlightGate {
    scope: FlightScope,
    busy: BusySet,
}

impl FlightGate {
    pub fn new(scope: FlightScope) -> Self {
        Self {
            scope,
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn scope(&self) -> FlightScope {
        self.scope
    }

    fn key(&self, channel_id: &ChannelId) -> String {
        match self.scope {
            FlightScope::Global => GLOBAL_KEY.to_string(),
            FlightScope::PerChannel => channel_id.0.clone(),
        }
    }

    /// Claim the scope of `channel_id`, or `None` if it is busy.
    pub fn try_acquire(&self, channel_id: &ChannelId) -> Option<FlightPermit> {
        let key = self.key(channel_id);
        if !lock(&self.busy).insert(key.clone()) {
            return None;
        }
        Some(FlightPermit {
            key,
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self, channel_id: &ChannelId) -> bool {
        lock(&self.busy).contains(&self.key(channel_id))
    }
}

/// Proof that the holder is the single in-flight generation for its scope.
#[derive(Debug)]
pub struct FlightPermit {
    key: String,
    busy: BusySet,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        lock(&self.busy).remove(&self.key);
    }
}
