//! Idempotency guard for reward grants
//!
//! One in-flight grant per `(code, user)` key. A session that completes keeps
//! its key for the dedupe window; a session dropped without completing
//! releases the key so the caller can retry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default dedupe window for completed grants (10 minutes)
const DEFAULT_WINDOW: Duration = Duration::from_secs(600);

/// Maximum tracked keys
const DEFAULT_MAX_SIZE: usize = 10000;

/// `(external code, user id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuardKey {
    pub code: String,
    pub user_id: String,
}

impl GuardKey {
    pub fn new(code: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for GuardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.code, self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Another grant with this key is in flight
    InFlight,
    /// A grant with this key completed within the dedupe window
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    InFlight,
    Completed,
}

#[derive(Debug)]
struct Entry {
    state: EntryState,
    since: Instant,
}

#[derive(Debug)]
struct GuardInner {
    entries: Mutex<HashMap<GuardKey, Entry>>,
    window: Duration,
    max_size: usize,
}

impl GuardInner {
    fn is_live(&self, entry: &Entry, now: Instant) -> bool {
        entry.state == EntryState::InFlight || now.duration_since(entry.since) < self.window
    }
}

/// Clones share the same key table
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    inner: Arc<GuardInner>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_WINDOW, DEFAULT_MAX_SIZE)
    }

    pub fn with_config(window: Duration, max_size: usize) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                entries: Mutex::new(HashMap::new()),
                window,
                max_size,
            }),
        }
    }

    /// Atomically claim `key`
    pub fn try_acquire(&self, key: GuardKey) -> Result<MintSession, Rejection> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        if let Some(entry) = entries.get(&key) {
            if self.inner.is_live(entry, now) {
                return Err(match entry.state {
                    EntryState::InFlight => Rejection::InFlight,
                    EntryState::Completed => Rejection::Completed,
                });
            }
        }

        if entries.len() >= self.inner.max_size {
            entries.retain(|_, entry| self.inner.is_live(entry, now));
        }
        // In-flight keys are never evicted, so the table may exceed max_size
        if entries.len() >= self.inner.max_size {
            if let Some(oldest) = entries
                .iter()
                .filter(|(_, e)| e.state == EntryState::Completed)
                .min_by_key(|(_, e)| e.since)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.clone(),
            Entry {
                state: EntryState::InFlight,
                since: now,
            },
        );
        debug!("Acquired grant session {}", key);
        Ok(MintSession {
            inner: self.inner.clone(),
            key,
            completed: false,
        })
    }

    /// Whether `key` is currently in flight or recently completed
    pub fn is_held(&self, key: &GuardKey) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .get(key)
            .is_some_and(|entry| self.inner.is_live(entry, now))
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Drop completed keys older than the dedupe window
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .retain(|_, entry| self.inner.is_live(entry, now));
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the lifetime of one grant
#[derive(Debug)]
pub struct MintSession {
    inner: Arc<GuardInner>,
    key: GuardKey,
    completed: bool,
}

impl MintSession {
    pub fn key(&self) -> &GuardKey {
        &self.key
    }

    /// Keep the key for the dedupe window
    pub fn complete(mut self) {
        self.completed = true;
        if let Some(entry) = self.inner.entries.lock().get_mut(&self.key) {
            entry.state = EntryState::Completed;
            entry.since = Instant::now();
        }
        debug!("Completed grant session {}", self.key);
    }
}

impl Drop for MintSession {
    fn drop(&mut self) {
        if !self.completed {
            self.inner.entries.lock().remove(&self.key);
            debug!("Released grant session {}", self.key);
        }
    }
}
