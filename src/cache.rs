//! The per-value-type cache facade.
//!
//! A [`Cache`] binds the ordered map, the alternate-key index, the hub's
//! change aggregator, and an optional entry getter into the public contract:
//!
//! ```text
//! set ──▶ validate alt-keys ──▶ transaction ──▶ OrderedMap.set ──▶ may evict
//!                                    │                               │
//!                                    │          AltKeyIndex bind/unbind
//!                                    ▼
//!                         record insert (+ lru remove)
//!                                    │
//!                  transaction close ──▶ one dispatch to listeners
//! ```
//!
//! `Cache` values are cheap handles onto shared state owned by their
//! [`CacheHub`](crate::CacheHub); cloning a cache clones the handle, and
//! every handle obtained for the same value-type addresses the same entries.
//!
//! # Lookup keys
//!
//! Every read operation (`get`, `get_without_lru_change`, `has`, `fetch`) and
//! `delete` accepts either the primary key or any alternate key of an entry.
//!
//! # Miss population
//!
//! A configured [`EntryGetter`] supplies entries for missing keys. The
//! synchronous variant is serviced by [`get`](Cache::get); the asynchronous
//! variant by [`fetch`](Cache::fetch), which memoizes the in-flight future
//! per key: concurrent fetches of one missing key share a single getter
//! invocation. A `set`, `delete`, or `clear` that lands while a fetch is in
//! flight supersedes it; the late resolution is discarded.

use crate::altkey::AltKeyIndex;
use crate::change::ChangeKind;
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::getter::{yield_once, EntryGetter, PendingFetch, SyncGetterFn};
use crate::hub::HubCore;
use crate::map::OrderedMap;
use core::fmt;
use core::num::NonZeroUsize;
use futures_util::FutureExt;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Options for [`Cache::get_with`] and [`Cache::fetch_with`].
///
/// `bypass_cache` skips the cache lookup and forces the getter to run; it
/// fails with [`CacheError::NoEntryGetter`] when no getter is available. A
/// per-call getter takes precedence over the cache's configured getter.
pub struct GetOptions<V> {
    bypass_cache: bool,
    getter: Option<EntryGetter<V>>,
}

impl<V> GetOptions<V> {
    /// Default options: consult the cache, use the configured getter on miss.
    pub fn new() -> Self {
        GetOptions {
            bypass_cache: false,
            getter: None,
        }
    }

    /// Skips the cache and forces the getter to produce the entry.
    pub fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// Uses `getter` for this call instead of the cache's configured getter.
    pub fn with_getter(mut self, getter: EntryGetter<V>) -> Self {
        self.getter = Some(getter);
        self
    }
}

impl<V> Default for GetOptions<V> {
    fn default() -> Self {
        GetOptions::new()
    }
}

impl<V> Clone for GetOptions<V> {
    fn clone(&self) -> Self {
        GetOptions {
            bypass_cache: self.bypass_cache,
            getter: self.getter.clone(),
        }
    }
}

impl<V> fmt::Debug for GetOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetOptions")
            .field("bypass_cache", &self.bypass_cache)
            .field("getter", &self.getter)
            .finish()
    }
}

/// Mutable cache state, guarded by one lock per cache.
struct CacheState<V> {
    map: OrderedMap<V>,
    alt: AltKeyIndex,
    dispatch_lru_removes: bool,
    dispatch_clear_removes: bool,
    getter: Option<EntryGetter<V>>,
    pending: HashMap<String, PendingFetch<V>>,
    next_fetch_token: u64,
}

struct CacheInner<V> {
    value_type: String,
    state: Mutex<CacheState<V>>,
}

/// A per-value-type cache with LRU eviction, alternate keys, and change
/// notifications.
///
/// Obtained from a [`CacheHub`](crate::CacheHub); see the
/// [module docs](self) for the data flow.
///
/// # Examples
///
/// ```
/// use cachebus::{CacheEntry, CacheHub};
///
/// let hub: CacheHub<String> = CacheHub::new();
/// let cache = hub.cache("User");
///
/// cache
///     .set(CacheEntry::new("u1", "Alice".to_owned()).with_alternate_key("login:alice"))
///     .unwrap();
///
/// assert_eq!(cache.get("u1").unwrap(), Some("Alice".to_owned()));
/// assert_eq!(cache.get("login:alice").unwrap(), Some("Alice".to_owned()));
/// assert!(cache.has("login:alice"));
/// ```
pub struct Cache<V> {
    core: Arc<HubCore<V>>,
    inner: Arc<CacheInner<V>>,
}

/// Resolves a lookup key to a primary key: primary keys win, alternate keys
/// are consulted second.
fn resolve_key<V>(state: &CacheState<V>, key: &str) -> Option<String> {
    if state.map.contains(key) {
        Some(key.to_owned())
    } else {
        state.alt.lookup(key).map(str::to_owned)
    }
}

/// How a fetch proceeds after the synchronous phase under the lock.
enum FetchPlan<V> {
    Sync(Arc<SyncGetterFn<V>>),
    Await {
        shared: crate::getter::SharedFetch<V>,
        token: u64,
    },
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    pub(crate) fn new(core: Arc<HubCore<V>>, value_type: String, config: CacheConfig) -> Self {
        Cache {
            core,
            inner: Arc::new(CacheInner {
                value_type,
                state: Mutex::new(CacheState {
                    map: OrderedMap::new(config.max_size()),
                    alt: AltKeyIndex::new(),
                    dispatch_lru_removes: config.dispatch_lru_removes(),
                    dispatch_clear_removes: config.dispatch_clear_removes(),
                    getter: None,
                    pending: HashMap::new(),
                    next_fetch_token: 0,
                }),
            }),
        }
    }

    /// The value-type this cache stores.
    #[inline]
    pub fn value_type(&self) -> &str {
        &self.inner.value_type
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.state.lock().map.len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().map.is_empty()
    }

    /// The entry cap, or `None` when unbounded.
    pub fn max_size(&self) -> Option<NonZeroUsize> {
        self.inner.state.lock().map.max_size()
    }

    /// Inserts or updates one entry. Equivalent to `set_all` with a single
    /// element.
    ///
    /// # Errors
    ///
    /// [`CacheError::AlternateKeyConflict`] if one of the entry's alternate
    /// keys belongs to a different entry; [`CacheError::HandlerFailures`] if
    /// the resulting dispatch had failing handlers.
    pub fn set(&self, entry: CacheEntry<V>) -> Result<(), CacheError> {
        self.set_all(vec![entry])
    }

    /// Inserts or updates a batch of entries under one transaction.
    ///
    /// Entries are applied in order. A conflict aborts the batch at the
    /// failing entry; entries already applied stay applied and are
    /// dispatched.
    pub fn set_all(&self, entries: Vec<CacheEntry<V>>) -> Result<(), CacheError> {
        self.core.run_txn(|| {
            for entry in entries {
                self.apply_set(entry)?;
            }
            Ok(())
        })
    }

    /// Like [`set`](Cache::set), deferred by one scheduling turn.
    pub async fn set_async(&self, entry: CacheEntry<V>) -> Result<(), CacheError> {
        yield_once().await;
        self.set(entry)
    }

    /// Like [`set_all`](Cache::set_all), deferred by one scheduling turn.
    pub async fn set_all_async(&self, entries: Vec<CacheEntry<V>>) -> Result<(), CacheError> {
        yield_once().await;
        self.set_all(entries)
    }

    /// Looks up `key` (primary or alternate), touching the entry to newest.
    ///
    /// On miss, a configured *synchronous* getter is invoked and its entry
    /// inserted. An asynchronous getter is not consulted here; use
    /// [`fetch`](Cache::fetch).
    pub fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        self.get_with(key, GetOptions::new())
    }

    /// [`get`](Cache::get) with explicit [`GetOptions`].
    ///
    /// # Errors
    ///
    /// [`CacheError::NoEntryGetter`] if `bypass_cache` is set and no
    /// synchronous getter is available.
    pub fn get_with(&self, key: &str, options: GetOptions<V>) -> Result<Option<V>, CacheError> {
        let bypass = options.bypass_cache;
        let getter = {
            let mut state = self.inner.state.lock();
            if !bypass {
                if let Some(primary) = resolve_key(&state, key) {
                    if let Some(found) = state.map.get(&primary) {
                        return Ok(Some(found.value.clone()));
                    }
                }
            }
            options.getter.or_else(|| state.getter.clone())
        };
        match getter {
            Some(EntryGetter::Sync(getter)) => self.populate_from(getter.as_ref(), key),
            _ if bypass => Err(CacheError::NoEntryGetter {
                key: key.to_owned(),
                value_type: self.inner.value_type.clone(),
            }),
            _ => Ok(None),
        }
    }

    /// Looks up `key` without changing recency order. A synchronous getter
    /// still populates the cache on miss (the insertion itself counts as a
    /// touch).
    pub fn get_without_lru_change(&self, key: &str) -> Result<Option<V>, CacheError> {
        let getter = {
            let state = self.inner.state.lock();
            if let Some(primary) = resolve_key(&state, key) {
                if let Some(found) = state.map.peek(&primary) {
                    return Ok(Some(found.value.clone()));
                }
            }
            state.getter.clone()
        };
        match getter {
            Some(EntryGetter::Sync(getter)) => self.populate_from(getter.as_ref(), key),
            _ => Ok(None),
        }
    }

    /// Reports presence of `key` (primary or alternate) without consulting
    /// the getter and without touching recency.
    pub fn has(&self, key: &str) -> bool {
        let state = self.inner.state.lock();
        resolve_key(&state, key).is_some()
    }

    /// Looks up `key`, falling back to the configured getter (synchronous or
    /// asynchronous) on miss.
    ///
    /// For an asynchronous getter the in-flight future is memoized under the
    /// requested key: concurrent `fetch` calls for one missing key share a
    /// single getter invocation, and all of them resolve to the fetched
    /// value. A getter resolving to `None` inserts nothing and clears the
    /// memo, so a later `fetch` retries.
    pub async fn fetch(&self, key: &str) -> Result<Option<V>, CacheError> {
        self.fetch_with(key, GetOptions::new()).await
    }

    /// [`fetch`](Cache::fetch) with explicit [`GetOptions`].
    ///
    /// # Errors
    ///
    /// [`CacheError::NoEntryGetter`] if `bypass_cache` is set and no getter
    /// is available.
    pub async fn fetch_with(
        &self,
        key: &str,
        options: GetOptions<V>,
    ) -> Result<Option<V>, CacheError> {
        let bypass = options.bypass_cache;
        let plan = {
            let mut state = self.inner.state.lock();
            if !bypass {
                if let Some(primary) = resolve_key(&state, key) {
                    if let Some(found) = state.map.get(&primary) {
                        return Ok(Some(found.value.clone()));
                    }
                }
            }
            let joinable = if bypass {
                None
            } else {
                state.pending.get(key).map(|pending| FetchPlan::Await {
                    shared: pending.shared.clone(),
                    token: pending.token,
                })
            };
            match joinable {
                Some(plan) => plan,
                None => match options.getter.or_else(|| state.getter.clone()) {
                    Some(EntryGetter::Sync(getter)) => FetchPlan::Sync(getter),
                    Some(EntryGetter::Async(getter)) => {
                        let shared = (getter.as_ref())(key).shared();
                        let token = state.next_fetch_token;
                        state.next_fetch_token += 1;
                        state.pending.insert(
                            key.to_owned(),
                            PendingFetch {
                                token,
                                shared: shared.clone(),
                            },
                        );
                        FetchPlan::Await { shared, token }
                    }
                    None => {
                        return if bypass {
                            Err(CacheError::NoEntryGetter {
                                key: key.to_owned(),
                                value_type: self.inner.value_type.clone(),
                            })
                        } else {
                            Ok(None)
                        };
                    }
                },
            }
        };

        match plan {
            FetchPlan::Sync(getter) => self.populate_from(getter.as_ref(), key),
            FetchPlan::Await { shared, token } => {
                let resolved = shared.await;
                let memo_current = {
                    let mut state = self.inner.state.lock();
                    match state.pending.get(key) {
                        Some(pending) if pending.token == token => {
                            state.pending.remove(key);
                            true
                        }
                        _ => false,
                    }
                };
                match resolved {
                    Some(entry) if memo_current => {
                        let value = entry.value.clone();
                        self.set(entry)?;
                        Ok(Some(value))
                    }
                    Some(_) => {
                        // A mutation superseded this fetch: the resolved
                        // entry is discarded and the caller observes the
                        // cache's current state for the key.
                        let state = self.inner.state.lock();
                        match resolve_key(&state, key) {
                            Some(primary) => {
                                Ok(state.map.peek(&primary).map(|found| found.value.clone()))
                            }
                            None => Ok(None),
                        }
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Removes the entry for `key` (primary or alternate). Returns whether an
    /// entry was removed.
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.core.run_txn(|| {
            let mut state = self.inner.state.lock();
            let Some(primary) = resolve_key(&state, key) else {
                return Ok(false);
            };
            let Some(entry) = state.map.remove(&primary) else {
                return Ok(false);
            };
            state.alt.unbind_all(entry.alternate_keys.iter());
            state.pending.remove(&primary);
            if self.core.has_interest(&self.inner.value_type) {
                self.core
                    .record_change(&self.inner.value_type, ChangeKind::DeleteRemove, &entry);
            }
            Ok(true)
        })
    }

    /// Removes every entry. With clear-remove dispatch enabled, each removed
    /// entry is reported to listeners in oldest→newest order.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.core.run_txn(|| {
            self.clear_locked();
            Ok(())
        })
    }

    /// Clears under an already-open transaction. Shared with
    /// `CacheHub::clear_all_caches`.
    pub(crate) fn clear_locked(&self) {
        let mut state = self.inner.state.lock();
        let drained = state.map.clear();
        state.alt.clear();
        state.pending.clear();
        if drained.is_empty() {
            return;
        }
        tracing::debug!(
            value_type = %self.inner.value_type,
            removed = drained.len(),
            "cache cleared"
        );
        if state.dispatch_clear_removes && self.core.has_interest(&self.inner.value_type) {
            for entry in &drained {
                self.core
                    .record_change(&self.inner.value_type, ChangeKind::ClearRemove, entry);
            }
        }
    }

    /// Changes the entry cap; `0` means unbounded. Shrinking evicts oldest
    /// entries until the size fits, reporting them as LRU removes when that
    /// dispatch is enabled.
    pub fn set_max_size(&self, max_size: usize) -> Result<(), CacheError> {
        self.core.run_txn(|| {
            let mut state = self.inner.state.lock();
            let evicted = state.map.set_max_size(NonZeroUsize::new(max_size));
            if evicted.is_empty() {
                return Ok(());
            }
            tracing::trace!(
                value_type = %self.inner.value_type,
                evicted = evicted.len(),
                "shrink evicted oldest entries"
            );
            let report = state.dispatch_lru_removes && self.core.has_interest(&self.inner.value_type);
            for entry in &evicted {
                state.alt.unbind_all(entry.alternate_keys.iter());
                if report {
                    self.core
                        .record_change(&self.inner.value_type, ChangeKind::LruRemove, entry);
                }
            }
            Ok(())
        })
    }

    /// Snapshot of all entries, oldest→newest.
    pub fn entries(&self) -> Vec<CacheEntry<V>> {
        self.inner.state.lock().map.iter().cloned().collect()
    }

    /// Visits every entry oldest→newest. The cache lock is held for the
    /// duration, so the callback must not call back into this cache.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&CacheEntry<V>),
    {
        let state = self.inner.state.lock();
        for entry in state.map.iter() {
            visit(entry);
        }
    }

    /// Enables or disables reporting of LRU evictions to listeners.
    pub fn set_dispatch_lru_removes(&self, dispatch: bool) {
        self.inner.state.lock().dispatch_lru_removes = dispatch;
    }

    /// Enables or disables reporting of `clear` removals to listeners.
    pub fn set_dispatch_clear_removes(&self, dispatch: bool) {
        self.inner.state.lock().dispatch_clear_removes = dispatch;
    }

    /// Installs or removes the cache's entry getter.
    pub fn set_entry_getter(&self, getter: Option<EntryGetter<V>>) {
        self.inner.state.lock().getter = getter;
    }

    /// Invokes a synchronous getter for `key` and inserts its entry.
    fn populate_from(
        &self,
        getter: &SyncGetterFn<V>,
        key: &str,
    ) -> Result<Option<V>, CacheError> {
        match getter(key) {
            Some(entry) => {
                let value = entry.value.clone();
                self.set(entry)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Applies one upsert under the open transaction: validates and binds
    /// alternate keys, records the insert, and handles a possible eviction.
    fn apply_set(&self, mut entry: CacheEntry<V>) -> Result<(), CacheError> {
        let mut state = self.inner.state.lock();

        // An alternate key equal to the own primary is redundant.
        entry.alternate_keys.remove(&entry.key);

        // Validate every alternate key before mutating anything, so a
        // conflicting entry leaves the cache untouched.
        for alt_key in &entry.alternate_keys {
            if let Some(existing) = state.alt.lookup(alt_key) {
                if existing != entry.key {
                    return Err(CacheError::AlternateKeyConflict {
                        alt_key: alt_key.clone(),
                        value_type: self.inner.value_type.clone(),
                        requested: entry.key.clone(),
                        existing: existing.to_owned(),
                    });
                }
            } else if state.map.contains(alt_key) {
                // The alternate key is another entry's primary key.
                return Err(CacheError::AlternateKeyConflict {
                    alt_key: alt_key.clone(),
                    value_type: self.inner.value_type.clone(),
                    requested: entry.key.clone(),
                    existing: alt_key.clone(),
                });
            }
        }

        // Updates extend the alternate-key set (union semantics).
        if let Some(current) = state.map.peek(&entry.key) {
            for alt_key in &current.alternate_keys {
                if !entry.alternate_keys.contains(alt_key) {
                    entry.alternate_keys.insert(alt_key.clone());
                }
            }
        }

        for alt_key in &entry.alternate_keys {
            state.alt.bind(alt_key.clone(), &entry.key);
        }

        // The entry supersedes any in-flight fetch for its key.
        state.pending.remove(&entry.key);

        let interested = self.core.has_interest(&self.inner.value_type);
        let snapshot = if interested { Some(entry.clone()) } else { None };
        let evicted = state.map.set(entry);

        if let Some(snapshot) = snapshot {
            self.core
                .record_change(&self.inner.value_type, ChangeKind::Insert, &snapshot);
        }

        if let Some(evicted) = evicted {
            state.alt.unbind_all(evicted.alternate_keys.iter());
            tracing::trace!(
                value_type = %self.inner.value_type,
                key = %evicted.key,
                "evicted least recently used entry"
            );
            if state.dispatch_lru_removes && interested {
                self.core
                    .record_change(&self.inner.value_type, ChangeKind::LruRemove, &evicted);
            }
        }

        Ok(())
    }
}

impl<V> Clone for Cache<V> {
    fn clone(&self) -> Self {
        Cache {
            core: Arc::clone(&self.core),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Cache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("value_type", &self.inner.value_type)
            .finish()
    }
}
