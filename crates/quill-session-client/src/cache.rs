// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client query/mutation cache.
//!
//! Entries are keyed by `(group, operation, canonical input)`. Every entry
//! carries a generation number; invalidation replaces it with a new one, and
//! a fetch only writes its result back when the entry still has the
//! generation the fetch started under. Fetches run on their own tasks, so a
//! caller that stops waiting does not cancel them.
//!
//! Entries nobody observes stay cached until [`QueryCache::clear`],
//! [`QueryCache::evict_idle`], or until a cache built with
//! [`QueryCache::with_idle_limit`] has more idle entries than its limit, in
//! which case the least recently used ones go first.
//!
//! Internal state sits behind a `std::sync::Mutex` that is never held across
//! an `.await`. [`QueryCache::invalidate`] spawns refetches and therefore
//! must be called from within a tokio runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use quill_registry_api::{CallError, CallRequest, Transport};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

type Fetch = Shared<BoxFuture<'static, Result<Value, CallError>>>;
type Entries = Mutex<HashMap<CacheKey, Entry>>;

/// Cache key: group, operation and the canonical JSON form of the input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Group name.
    pub group: String,
    /// Operation name.
    pub operation: String,
    /// Input serialized with object keys sorted.
    pub input: String,
}

impl CacheKey {
    /// Key for `group.operation(input)`.
    pub fn new(group: &str, operation: &str, input: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(input, &mut canonical);
        Self {
            group: group.to_string(),
            operation: operation.to_string(),
            input: canonical,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.group, self.operation, self.input)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

struct InFlight {
    generation: u64,
    fetch: Fetch,
}

struct Entry {
    // Distinguishes this entry from a later one under the same key.
    id: u64,
    input: Value,
    value: Option<Value>,
    fresh: bool,
    generation: u64,
    last_error: Option<CallError>,
    inflight: Option<InFlight>,
    observers: usize,
    // Counter value of the last query or observe on this entry.
    touched: u64,
    tx: watch::Sender<Option<Value>>,
}

impl Entry {
    fn is_idle(&self) -> bool {
        self.observers == 0 && self.inflight.is_none()
    }
}

/// Read-only view of one cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
    /// A value is stored and no invalidation happened since it was fetched.
    pub fresh: bool,
    /// Last successful value, fresh or stale.
    pub value: Option<Value>,
    /// Attached observers.
    pub observers: usize,
    /// Error of the last failed fetch; cleared by the next success.
    pub last_error: Option<CallError>,
    /// A fetch is running.
    pub in_flight: bool,
}

struct Inner<T> {
    transport: T,
    entries: Arc<Entries>,
    counter: AtomicU64,
    idle_limit: Option<usize>,
}

/// Injectable query/mutation cache over a [`Transport`].
///
/// Clones share the same entries.
pub struct QueryCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for QueryCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &lock(&self.inner.entries).len())
            .finish_non_exhaustive()
    }
}

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Step {
    Ready(Value),
    Join(Fetch),
    // A fetch from an older generation is still running; wait it out first.
    Drain(Fetch),
}

impl<T: Transport> QueryCache<T> {
    /// Empty cache over `transport`.
    pub fn new(transport: T) -> Self {
        Self::build(transport, None)
    }

    /// Empty cache that keeps at most `limit` idle entries (no observers, no
    /// fetch running), evicting the least recently used beyond that.
    pub fn with_idle_limit(transport: T, limit: usize) -> Self {
        Self::build(transport, Some(limit))
    }

    fn build(transport: T, idle_limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                entries: Arc::new(Mutex::new(HashMap::new())),
                counter: AtomicU64::new(1),
                idle_limit,
            }),
        }
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    fn next_id(&self) -> u64 {
        self.inner.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn new_entry(&self, input: &Value) -> Entry {
        let id = self.next_id();
        Entry {
            id,
            input: input.clone(),
            value: None,
            fresh: false,
            generation: id,
            last_error: None,
            inflight: None,
            observers: 0,
            touched: id,
            tx: watch::Sender::new(None),
        }
    }

    /// Run a query.
    ///
    /// A fresh value is returned without touching the transport. Otherwise
    /// concurrent callers share one request per key. A request that started
    /// before the latest invalidation of this key is never returned: the
    /// caller waits for it to settle and then issues a new one.
    pub async fn query(&self, group: &str, operation: &str, input: Value) -> Result<Value, CallError> {
        let key = CacheKey::new(group, operation, &input);
        self.fetch_current(&key, &input).await
    }

    /// Suspending query: attach an observer, then wait for the first value.
    ///
    /// If the returned future is dropped the fetch still completes on its own
    /// task and its value is cached.
    pub async fn suspend(
        &self,
        group: &str,
        operation: &str,
        input: Value,
    ) -> Result<(Value, Observer), CallError> {
        let mut observer = self.observe(group, operation, input.clone());
        let value = self.fetch_current(&observer.key, &input).await?;
        observer.mark_seen();
        Ok((value, observer))
    }

    /// Attach an observer without fetching.
    pub fn observe(&self, group: &str, operation: &str, input: Value) -> Observer {
        let key = CacheKey::new(group, operation, &input);
        let mut entries = lock(&self.inner.entries);
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| self.new_entry(&input));
        entry.observers += 1;
        entry.touched = self.next_id();
        debug!(%key, observers = entry.observers, "observer attached");
        Observer {
            rx: entry.tx.subscribe(),
            entry_id: entry.id,
            key,
            entries: Arc::downgrade(&self.inner.entries),
        }
    }

    /// Run a mutation. Always hits the transport; never reads or writes entries.
    pub async fn mutate(&self, group: &str, operation: &str, input: Value) -> Result<Value, CallError> {
        let result = self
            .inner
            .transport
            .call(CallRequest::new(group, operation, input))
            .await;
        match &result {
            Ok(_) => debug!(group, operation, "mutation succeeded"),
            Err(err @ CallError::NotFound { .. }) => error!(group, operation, %err, "mutation target missing"),
            Err(err) => warn!(group, operation, kind = ?err.kind(), "mutation failed"),
        }
        result
    }

    /// Mark every entry of `group` (or only `group.operation`) stale.
    ///
    /// Each marked entry with observers gets one background refetch; the rest
    /// refetch on their next query. Returns the number of entries marked.
    pub fn invalidate(&self, group: &str, operation: Option<&str>) -> usize {
        let mut refetch = Vec::new();
        let mut marked = 0;
        {
            let mut entries = lock(&self.inner.entries);
            for (key, entry) in entries.iter_mut() {
                if key.group != group || operation.is_some_and(|op| op != key.operation) {
                    continue;
                }
                entry.fresh = false;
                entry.generation = self.next_id();
                marked += 1;
                if entry.observers > 0 {
                    refetch.push((key.clone(), entry.input.clone()));
                }
            }
        }
        info!(group, ?operation, marked, refetching = refetch.len(), "queries invalidated");
        for (key, input) in refetch {
            let cache = self.clone();
            tokio::spawn(async move {
                if let Err(err) = cache.fetch_current(&key, &input).await {
                    debug!(%key, %err, "background refetch failed");
                }
            });
        }
        marked
    }

    /// Snapshot of the entry for `group.operation(input)`, if one exists.
    pub fn entry_state(&self, group: &str, operation: &str, input: &Value) -> Option<EntrySnapshot> {
        let key = CacheKey::new(group, operation, input);
        lock(&self.inner.entries).get(&key).map(|entry| EntrySnapshot {
            fresh: entry.fresh && entry.value.is_some(),
            value: entry.value.clone(),
            observers: entry.observers,
            last_error: entry.last_error.clone(),
            in_flight: entry.inflight.is_some(),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        lock(&self.inner.entries).is_empty()
    }

    /// Remove every idle entry (no observers, no fetch running). Returns how
    /// many were removed.
    pub fn evict_idle(&self) -> usize {
        let mut entries = lock(&self.inner.entries);
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_idle());
        let evicted = before - entries.len();
        debug!(evicted, "idle entries evicted");
        evicted
    }

    /// Drop every entry. Running fetches finish but store nothing, and
    /// observers stop receiving updates.
    pub fn clear(&self) {
        let dropped = {
            let mut entries = lock(&self.inner.entries);
            let n = entries.len();
            entries.clear();
            n
        };
        debug!(dropped, "cache cleared");
    }

    async fn fetch_current(&self, key: &CacheKey, input: &Value) -> Result<Value, CallError> {
        loop {
            let step = {
                let mut entries = lock(&self.inner.entries);
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| self.new_entry(input));
                entry.touched = self.next_id();
                let cached = if entry.fresh { entry.value.clone() } else { None };
                if let Some(value) = cached {
                    Step::Ready(value)
                } else if let Some(f) = &entry.inflight {
                    if f.generation == entry.generation {
                        Step::Join(f.fetch.clone())
                    } else {
                        Step::Drain(f.fetch.clone())
                    }
                } else {
                    Step::Join(self.start_fetch(key, entry))
                }
            };
            match step {
                Step::Ready(value) => {
                    debug!(%key, "cache hit");
                    return Ok(value);
                }
                Step::Join(fetch) => return fetch.await,
                Step::Drain(fetch) => {
                    debug!(%key, "waiting out a pre-invalidation fetch");
                    let _ = fetch.await;
                }
            }
        }
    }

    // Called with the entries lock held.
    fn start_fetch(&self, key: &CacheKey, entry: &mut Entry) -> Fetch {
        let generation = entry.generation;
        debug!(%key, generation, "fetch started");
        let call = self.inner.transport.call(CallRequest::new(
            key.group.clone(),
            key.operation.clone(),
            entry.input.clone(),
        ));
        let entries = Arc::clone(&self.inner.entries);
        let idle_limit = self.inner.idle_limit;
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = call.await;
            complete(&entries, &task_key, generation, &result);
            if let Some(limit) = idle_limit {
                trim_idle(&mut lock(&entries), limit, &task_key);
            }
            result
        });
        let fetch = async move {
            task.await
                .unwrap_or_else(|err| Err(CallError::transport(format!("fetch task failed: {err}"))))
        }
        .boxed()
        .shared();
        entry.inflight = Some(InFlight {
            generation,
            fetch: fetch.clone(),
        });
        fetch
    }
}

fn complete(entries: &Entries, key: &CacheKey, generation: u64, result: &Result<Value, CallError>) {
    let mut entries = lock(entries);
    let Some(entry) = entries.get_mut(key) else {
        debug!(%key, "fetch finished after its entry was dropped");
        return;
    };
    if entry.inflight.as_ref().is_some_and(|f| f.generation == generation) {
        entry.inflight = None;
    }
    if entry.generation != generation {
        debug!(%key, generation, current = entry.generation, "stale fetch result discarded");
        return;
    }
    match result {
        Ok(value) => {
            entry.value = Some(value.clone());
            entry.fresh = true;
            entry.last_error = None;
            entry.tx.send_replace(Some(value.clone()));
        }
        Err(err) => {
            if matches!(err, CallError::NotFound { .. }) {
                error!(%key, %err, "query references an unregistered procedure");
            } else {
                warn!(%key, kind = ?err.kind(), "query failed");
            }
            entry.last_error = Some(err.clone());
        }
    }
}

// Evict least recently used idle entries beyond `limit`, sparing `keep`.
fn trim_idle(entries: &mut HashMap<CacheKey, Entry>, limit: usize, keep: &CacheKey) {
    let mut idle: Vec<(u64, &CacheKey)> = entries
        .iter()
        .filter(|(_, entry)| entry.is_idle())
        .map(|(key, entry)| (entry.touched, key))
        .collect();
    if idle.len() <= limit {
        return;
    }
    let excess = idle.len() - limit;
    idle.sort_unstable_by_key(|(touched, _)| *touched);
    let evict: Vec<CacheKey> = idle
        .into_iter()
        .map(|(_, key)| key)
        .filter(|key| *key != keep)
        .take(excess)
        .cloned()
        .collect();
    for key in &evict {
        entries.remove(key);
    }
    debug!(evicted = evict.len(), limit, "idle entries over limit evicted");
}

/// A View's registration on one cache entry.
///
/// Dropping the observer detaches it. When the last observer of an entry
/// detaches and no fetch is running, the entry is removed.
pub struct Observer {
    key: CacheKey,
    entry_id: u64,
    rx: watch::Receiver<Option<Value>>,
    entries: Weak<Entries>,
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").field("key", &self.key).finish_non_exhaustive()
    }
}

impl Observer {
    /// Key this observer watches.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Last value stored for the entry, if any.
    pub fn current(&self) -> Option<Value> {
        self.rx.borrow().clone()
    }

    /// Wait for the next stored value. `None` once the entry is gone.
    pub async fn changed(&mut self) -> Option<Value> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }

    /// Value stored since the last call to `changed`/`take_update`, if any.
    pub fn take_update(&mut self) -> Option<Value> {
        if self.rx.has_changed().unwrap_or(false) {
            self.rx.borrow_and_update().clone()
        } else {
            None
        }
    }

    fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        let Some(entries) = self.entries.upgrade() else {
            return;
        };
        let mut entries = lock(&entries);
        let remove = match entries.get_mut(&self.key) {
            Some(entry) if entry.id == self.entry_id => {
                entry.observers = entry.observers.saturating_sub(1);
                entry.observers == 0 && entry.inflight.is_none()
            }
            _ => false,
        };
        if remove {
            entries.remove(&self.key);
            debug!(key = %self.key, "last observer detached; entry removed");
        }
    }
}
