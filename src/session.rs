// Copyright 2026 The Mooring Project
// SPDX-License-Identifier: Apache-2.0

// Session gate
//
// Binds a client-chosen session id to a reusable backend context so a
// follow-up request can resume where the previous one stopped. A cached
// context is handed to at most one request at a time; contention falls
// back to a fresh, uncached context instead of waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::{BackendContext, BackendError, GenerationBackend};
use crate::config::{ModelConfig, SessionConfig};

struct SessionEntry {
    model: String,
    context: Arc<dyn BackendContext>,
    last_used: Instant,
    in_use: bool,
}

type SessionMap = HashMap<String, SessionEntry>;

struct Shared {
    config: SessionConfig,
    entries: Mutex<SessionMap>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionMap> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove idle entries. Returns the evicted contexts so the caller can
    /// drop them outside the lock.
    fn sweep(&self, entries: &mut SessionMap, now: Instant) -> Vec<Arc<dyn BackendContext>> {
        let idle_ttl = self.config.idle_ttl;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| !e.in_use && now.duration_since(e.last_used) > idle_ttl)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| {
                tracing::debug!(session_id = %id, "session expired");
                entries.remove(&id).map(|e| e.context)
            })
            .collect()
    }

    /// Evict the least recently used entry that is not in use.
    fn evict_lru(entries: &mut SessionMap) -> Option<Arc<dyn BackendContext>> {
        let victim = entries
            .iter()
            .filter(|(_, e)| !e.in_use)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(id, _)| id.clone())?;
        tracing::debug!(session_id = %victim, "session evicted (capacity)");
        entries.remove(&victim).map(|e| e.context)
    }

    fn release(&self, lease: &SessionLease) {
        let Some(session_id) = lease.session_id.as_deref() else {
            return;
        };
        let now = Instant::now();
        let mut dropped = Vec::new();
        {
            let mut entries = self.lock();
            match lease.kind {
                LeaseKind::Ephemeral => {}
                LeaseKind::Cached => {
                    if let Some(entry) = entries.get_mut(session_id) {
                        if Arc::ptr_eq(&entry.context, &lease.context) {
                            entry.in_use = false;
                            entry.last_used = now;
                        }
                    }
                }
                LeaseKind::Fresh => {
                    dropped.extend(self.sweep(&mut entries, now));
                    dropped.extend(self.insert(&mut entries, session_id, lease, now));
                }
            }
        }
        drop(dropped);
    }

    /// Store a fresh context under `session_id` if the slot is free.
    fn insert(
        &self,
        entries: &mut SessionMap,
        session_id: &str,
        lease: &SessionLease,
        now: Instant,
    ) -> Vec<Arc<dyn BackendContext>> {
        let mut dropped = Vec::new();
        match entries.get(session_id).map(|e| e.in_use) {
            Some(true) => {
                tracing::debug!(session_id, "session slot busy; fresh context discarded");
                return dropped;
            }
            Some(false) => {
                if let Some(old) = entries.remove(session_id) {
                    dropped.push(old.context);
                }
            }
            None => {}
        }

        while entries.len() >= self.config.capacity {
            match Self::evict_lru(entries) {
                Some(context) => dropped.push(context),
                None => {
                    tracing::debug!(session_id, "session cache full; insertion skipped");
                    return dropped;
                }
            }
        }

        entries.insert(
            session_id.to_string(),
            SessionEntry {
                model: lease.model.clone(),
                context: lease.context.clone(),
                last_used: now,
                in_use: false,
            },
        );
        dropped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseKind {
    /// No session id; never cached.
    Ephemeral,
    /// Borrowed from the cache; returned on drop.
    Cached,
    /// Newly created for a session id; offered to the cache on drop.
    Fresh,
}

/// Exclusive use of a backend context for one request.
///
/// Dropping the lease releases it back to the gate.
pub struct SessionLease {
    context: Arc<dyn BackendContext>,
    session_id: Option<String>,
    model: String,
    kind: LeaseKind,
    gate: Weak<Shared>,
}

impl SessionLease {
    pub fn context(&self) -> &Arc<dyn BackendContext> {
        &self.context
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether the context came from the cache.
    pub fn reused(&self) -> bool {
        self.kind == LeaseKind::Cached
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.upgrade() {
            gate.release(self);
        }
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("kind", &self.kind)
            .finish()
    }
}

/// LRU cache of backend contexts keyed by session id.
///
/// Owned by the server instance; every lookup, insert, eviction and
/// in-use change happens under one mutex.
pub struct SessionGate {
    backend: Arc<dyn GenerationBackend>,
    shared: Arc<Shared>,
}

impl SessionGate {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: SessionConfig) -> Self {
        Self {
            backend,
            shared: Arc::new(Shared {
                config,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Obtain a context for `model`, reusing the session's cached one when
    /// it is bound to the same model and idle.
    pub async fn acquire(
        &self,
        session_id: Option<&str>,
        model: &ModelConfig,
    ) -> Result<SessionLease, BackendError> {
        let Some(session_id) = session_id else {
            let context = self.backend.create_context(model).await?;
            return Ok(self.lease(context, None, model, LeaseKind::Ephemeral));
        };

        let now = Instant::now();
        let (cached, expired) = {
            let mut entries = self.shared.lock();
            let expired = self.shared.sweep(&mut entries, now);
            let cached = match entries.get_mut(session_id) {
                Some(entry) if entry.model == model.id && !entry.in_use => {
                    entry.in_use = true;
                    entry.last_used = now;
                    Some(entry.context.clone())
                }
                _ => None,
            };
            (cached, expired)
        };
        drop(expired);

        if let Some(context) = cached {
            tracing::debug!(session_id, model = %model.id, "session cache hit");
            return Ok(self.lease(context, Some(session_id), model, LeaseKind::Cached));
        }

        tracing::debug!(session_id, model = %model.id, "session cache miss");
        let context = self.backend.create_context(model).await?;
        Ok(self.lease(context, Some(session_id), model, LeaseKind::Fresh))
    }

    fn lease(
        &self,
        context: Arc<dyn BackendContext>,
        session_id: Option<&str>,
        model: &ModelConfig,
        kind: LeaseKind,
    ) -> SessionLease {
        SessionLease {
            context,
            session_id: session_id.map(str::to_string),
            model: model.id.clone(),
            kind,
            gate: Arc::downgrade(&self.shared),
        }
    }

    /// Evict idle entries now. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let expired = {
            let mut entries = self.shared.lock();
            self.shared.sweep(&mut entries, Instant::now())
        };
        expired.len()
    }

    /// Periodically evict idle entries until the gate is dropped.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let shared = Arc::downgrade(&self.shared);
        let period = self.shared.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let expired = {
                    let mut entries = shared.lock();
                    shared.sweep(&mut entries, Instant::now())
                };
                if !expired.is_empty() {
                    tracing::info!(evicted = expired.len(), "session sweep");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `session_id` is cached and currently leased.
    pub fn is_in_use(&self, session_id: &str) -> Option<bool> {
        self.shared.lock().get(session_id).map(|e| e.in_use)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{model, ScriptedBackend};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config(capacity: usize) -> SessionConfig {
        SessionConfig {
            capacity,
            idle_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
        }
    }

    fn gate(capacity: usize) -> (SessionGate, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::text(&["ok"]));
        (SessionGate::new(backend.clone(), config(capacity)), backend)
    }

    #[tokio::test]
    async fn no_session_id_is_never_cached() {
        let (gate, backend) = gate(4);
        let m = model("llama");
        drop(gate.acquire(None, &m).await.unwrap());
        drop(gate.acquire(None, &m).await.unwrap());
        assert!(gate.is_empty());
        assert_eq!(backend.contexts_created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_request_reuses_cached_context() {
        let (gate, backend) = gate(4);
        let m = model("llama");

        let first = gate.acquire(Some("s1"), &m).await.unwrap();
        assert!(!first.reused());
        let first_ctx = first.context().clone();
        drop(first);
        assert_eq!(gate.is_in_use("s1"), Some(false));

        let second = gate.acquire(Some("s1"), &m).await.unwrap();
        assert!(second.reused());
        assert!(Arc::ptr_eq(second.context(), &first_ctx));
        assert_eq!(gate.is_in_use("s1"), Some(true));
        drop(second);

        assert_eq!(gate.is_in_use("s1"), Some(false));
        assert_eq!(backend.contexts_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_use_gets_distinct_context() {
        let (gate, _) = gate(4);
        let m = model("llama");
        drop(gate.acquire(Some("s1"), &m).await.unwrap());

        let a = gate.acquire(Some("s1"), &m).await.unwrap();
        let b = gate.acquire(Some("s1"), &m).await.unwrap();
        assert!(a.reused());
        assert!(!b.reused());
        assert!(!Arc::ptr_eq(a.context(), b.context()));
        let cached = a.context().clone();

        // Slot busy: the fresh context is discarded, the cached one stays.
        drop(b);
        assert_eq!(gate.is_in_use("s1"), Some(true));
        drop(a);
        assert_eq!(gate.is_in_use("s1"), Some(false));

        let c = gate.acquire(Some("s1"), &m).await.unwrap();
        assert!(Arc::ptr_eq(c.context(), &cached));
    }

    #[tokio::test]
    async fn model_mismatch_replaces_entry_on_release() {
        let (gate, _) = gate(4);
        drop(gate.acquire(Some("s1"), &model("llama")).await.unwrap());

        let other = gate.acquire(Some("s1"), &model("phi3")).await.unwrap();
        assert!(!other.reused());
        let ctx = other.context().clone();
        drop(other);

        let again = gate.acquire(Some("s1"), &model("phi3")).await.unwrap();
        assert!(again.reused());
        assert!(Arc::ptr_eq(again.context(), &ctx));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_evicts_least_recently_used() {
        let (gate, _) = gate(2);
        let m = model("llama");
        drop(gate.acquire(Some("a"), &m).await.unwrap());
        tokio::time::advance(Duration::from_millis(10)).await;
        drop(gate.acquire(Some("b"), &m).await.unwrap());
        tokio::time::advance(Duration::from_millis(10)).await;
        // Touch "a" so "b" becomes the LRU entry.
        drop(gate.acquire(Some("a"), &m).await.unwrap());
        tokio::time::advance(Duration::from_millis(10)).await;
        drop(gate.acquire(Some("c"), &m).await.unwrap());

        assert_eq!(gate.len(), 2);
        assert!(gate.is_in_use("a").is_some());
        assert!(gate.is_in_use("b").is_none());
        assert!(gate.is_in_use("c").is_some());
    }

    #[tokio::test]
    async fn full_cache_of_busy_entries_skips_insert() {
        let (gate, _) = gate(1);
        let m = model("llama");
        drop(gate.acquire(Some("a"), &m).await.unwrap());
        let held = gate.acquire(Some("a"), &m).await.unwrap();

        drop(gate.acquire(Some("b"), &m).await.unwrap());
        assert_eq!(gate.len(), 1);
        assert!(gate.is_in_use("b").is_none());
        drop(held);
    }

    #[tokio::test]
    async fn zero_capacity_disables_caching() {
        let (gate, _) = gate(0);
        drop(gate.acquire(Some("a"), &model("llama")).await.unwrap());
        assert!(gate.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_entries_expire_on_acquire() {
        let (gate, _) = gate(4);
        let m = model("llama");
        drop(gate.acquire(Some("old"), &m).await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;

        drop(gate.acquire(Some("new"), &m).await.unwrap());
        assert!(gate.is_in_use("old").is_none());
        assert!(gate.is_in_use("new").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn in_use_entries_never_expire() {
        let (gate, _) = gate(4);
        let m = model("llama");
        drop(gate.acquire(Some("s"), &m).await.unwrap());
        let held = gate.acquire(Some("s"), &m).await.unwrap();
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(gate.sweep(), 0);
        drop(held);
        assert_eq!(gate.is_in_use("s"), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_evicts_idle_entries() {
        let (gate, _) = gate(4);
        drop(gate.acquire(Some("s"), &model("llama")).await.unwrap());
        let handle = gate.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(gate.is_empty());

        drop(gate);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(handle.is_finished());
    }
}
