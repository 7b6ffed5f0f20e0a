// In-memory dedup for duel processing and inbound interaction events.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::lock;
use crate::platform::UserId;

/// What a handler is working on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// An accept/decline answer for a pending challenge.
    Challenge(Uuid),
    /// A result report for the duel between (challenger, opponent).
    Duel(UserId, UserId),
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Challenge(id) => write!(f, "challenge:{id}"),
            SessionKey::Duel(c, o) => write!(f, "duel:{c}_{o}"),
        }
    }
}

/// Set of session keys currently being handled.
#[derive(Debug, Clone, Default)]
pub struct ProcessingRegistry {
    inner: Arc<Mutex<HashSet<SessionKey>>>,
}

impl ProcessingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark `key` as in progress. Returns false if another handler
    /// already holds it.
    pub fn register_processing(&self, key: SessionKey) -> bool {
        lock(&self.inner).insert(key)
    }

    pub fn release_processing(&self, key: SessionKey) {
        lock(&self.inner).remove(&key);
    }

    /// Register `key` and return a guard that releases it when dropped, or
    /// `None` if the key is already in progress.
    pub fn try_acquire(&self, key: SessionKey) -> Option<ProcessingGuard> {
        if self.register_processing(key) {
            Some(ProcessingGuard {
                registry: self.clone(),
                key,
            })
        } else {
            None
        }
    }
}

/// Releases its key on every exit path, including unwinding.
#[derive(Debug)]
pub struct ProcessingGuard {
    registry: ProcessingRegistry,
    key: SessionKey,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.registry.release_processing(self.key);
    }
}

/// Remembers inbound event keys for a retention window so that a redelivered
/// event is handled only once.
#[derive(Debug, Clone)]
pub struct InteractionDedup {
    retention: Duration,
    inner: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InteractionDedup {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record `key`. Returns true the first time it is seen within the
    /// retention window, false for a duplicate.
    pub fn first_delivery(&self, key: &str) -> bool {
        let mut seen = lock(&self.inner);
        let now = Instant::now();

        if let Some(at) = seen.get(key) {
            if now.duration_since(*at) < self.retention {
                return false;
            }
        }
        seen.insert(key.to_string(), now);
        true
    }

    /// Drop records older than the retention window. Returns how many remain.
    pub fn sweep(&self) -> usize {
        let mut seen = lock(&self.inner);
        let now = Instant::now();
        seen.retain(|_, at| now.duration_since(*at) < self.retention);
        seen.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
