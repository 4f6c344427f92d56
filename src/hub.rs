//! The cache hub: per-value-type cache registry, transactions, and dispatch.
//!
//! A [`CacheHub`] is the context object shared by every cache of one payload
//! type: it owns the cache registry, the change aggregator, and the listener
//! registry. Construct it once at initialization and clone the handle
//! wherever caches are needed; all shared state is lock-protected, and within
//! one hub `cache(value_type)` always returns the same cache.
//!
//! # Transactions
//!
//! Every mutation runs inside a transaction. Mutations called outside an
//! explicit [`transaction`](CacheHub::transaction) open a transient one that
//! dispatches before the call returns. Explicit transactions batch all
//! mutations, across every cache of the hub, into a single
//! [`ChangeRecord`], dispatched once when the outermost transaction closes;
//! nested transactions fold into the outer one.
//!
//! # Dispatch
//!
//! At transaction close the hub collects the active listeners whose filter
//! intersects the record's value-types and invokes them in registration
//! order, with no internal lock held (handlers may re-enter the caches).
//! Every handler runs even if earlier ones fail; the collected failures are
//! raised afterwards as [`CacheError::HandlerFailures`]. The accumulator is
//! reset regardless of handler outcome.
//!
//! # Examples
//!
//! ```
//! use cachebus::{CacheEntry, CacheHub};
//!
//! let hub: CacheHub<String> = CacheHub::new();
//! let users = hub.cache("User");
//!
//! let seen = hub.register_changed_handler(|record| {
//!     for (value_type, changes) in record.iter() {
//!         println!("{value_type}: {} inserts", changes.inserts.len());
//!     }
//!     Ok(())
//! });
//!
//! hub.transaction(|| {
//!     users.set(CacheEntry::new("u1", "Alice".to_owned()))?;
//!     users.set(CacheEntry::new("u2", "Bob".to_owned()))
//! })
//! .unwrap()
//! .unwrap();
//!
//! seen.unregister();
//! ```

use crate::cache::Cache;
use crate::change::{Aggregator, ChangeKind, ChangeRecord};
use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::CacheError;
use crate::listener::{ChangeHandler, HandlerError, ListenerHandle, ListenerRegistry};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Shared hub state. Lock order: a cache's state lock may be held while
/// taking `txn` or `listeners`; never the other way around, and dispatch runs
/// with no lock held.
pub(crate) struct HubCore<V> {
    caches: Mutex<HashMap<String, Cache<V>>>,
    txn: Mutex<Aggregator<V>>,
    listeners: Arc<Mutex<ListenerRegistry<V>>>,
}

impl<V> HubCore<V> {
    fn begin(&self) -> TxnGuard<'_, V> {
        self.txn.lock().begin();
        TxnGuard {
            core: self,
            done: false,
        }
    }

    /// Closes one transaction scope; dispatches when it was the outermost.
    fn close(&self) -> Result<(), CacheError> {
        let record = self.txn.lock().end();
        let Some(record) = record else {
            return Ok(());
        };
        if record.is_empty() {
            return Ok(());
        }
        self.dispatch(record)
    }

    fn dispatch(&self, record: ChangeRecord<V>) -> Result<(), CacheError> {
        let handlers = self.listeners.lock().handlers_for(record.value_types());
        if handlers.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            events = record.event_count(),
            listeners = handlers.len(),
            "dispatching change record"
        );
        let invoked = handlers.len();
        let mut errors: Vec<HandlerError> = Vec::new();
        for handler in handlers {
            if let Err(error) = (handler.as_ref())(&record) {
                tracing::warn!(error = %error, "change handler failed");
                errors.push(error);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CacheError::HandlerFailures { invoked, errors })
        }
    }

    pub(crate) fn has_interest(&self, value_type: &str) -> bool {
        self.listeners.lock().has_interest(value_type)
    }

    /// Runs `work` inside a transaction scope. The inner result takes
    /// precedence over handler failures from the closing dispatch.
    pub(crate) fn run_txn<R>(
        &self,
        work: impl FnOnce() -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let guard = self.begin();
        let out = work();
        let closed = guard.finish();
        match (out, closed) {
            (Err(error), _) => Err(error),
            (Ok(_), Err(error)) => Err(error),
            (Ok(value), Ok(())) => Ok(value),
        }
    }
}

impl<V: Clone> HubCore<V> {
    /// Snapshots `entry` into the open transaction's record.
    pub(crate) fn record_change(&self, value_type: &str, kind: ChangeKind, entry: &CacheEntry<V>) {
        self.txn.lock().record(value_type, kind, entry);
    }
}

/// Closes the transaction scope on every exit path. `finish` is the normal
/// path and surfaces handler failures; a drop without `finish` (panic or
/// cancelled future) still closes the scope so no accumulator state leaks.
struct TxnGuard<'a, V> {
    core: &'a HubCore<V>,
    done: bool,
}

impl<V> TxnGuard<'_, V> {
    fn finish(mut self) -> Result<(), CacheError> {
        self.done = true;
        self.core.close()
    }
}

impl<V> Drop for TxnGuard<'_, V> {
    fn drop(&mut self) {
        if !self.done {
            if let Err(error) = self.core.close() {
                tracing::warn!(error = %error, "change handlers failed in abandoned transaction");
            }
        }
    }
}

/// The shared context owning every cache, listener, and transaction of one
/// payload type `V`.
///
/// Cloning a hub clones a handle to the same shared state. See the
/// [module docs](self) for semantics, and [`Cache`] for the per-cache
/// operations.
pub struct CacheHub<V> {
    core: Arc<HubCore<V>>,
}

impl<V: Clone + Send + Sync + 'static> CacheHub<V> {
    /// Creates an empty hub.
    pub fn new() -> Self {
        CacheHub {
            core: Arc::new(HubCore {
                caches: Mutex::new(HashMap::new()),
                txn: Mutex::new(Aggregator::new()),
                listeners: Arc::new(Mutex::new(ListenerRegistry::new())),
            }),
        }
    }

    /// Returns the cache for `value_type`, creating it with the default
    /// [`CacheConfig`] on first retrieval. Repeated calls return the same
    /// cache.
    pub fn cache(&self, value_type: &str) -> Cache<V> {
        self.cache_with(value_type, CacheConfig::default())
    }

    /// Returns the cache for `value_type`, creating it with `config` on first
    /// retrieval. The config is ignored when the cache already exists.
    pub fn cache_with(&self, value_type: &str, config: CacheConfig) -> Cache<V> {
        let mut caches = self.core.caches.lock();
        caches
            .entry(value_type.to_owned())
            .or_insert_with(|| {
                tracing::debug!(value_type, "creating cache");
                Cache::new(Arc::clone(&self.core), value_type.to_owned(), config)
            })
            .clone()
    }

    /// Clears every cache of the hub under one transaction.
    pub fn clear_all_caches(&self) -> Result<(), CacheError> {
        let caches: Vec<Cache<V>> = self.core.caches.lock().values().cloned().collect();
        self.core.run_txn(|| {
            for cache in &caches {
                cache.clear_locked();
            }
            Ok(())
        })
    }

    /// Runs `work` inside a transaction, batching every mutation it performs
    /// into a single dispatch when the outermost transaction closes.
    ///
    /// # Errors
    ///
    /// [`CacheError::HandlerFailures`] if the closing dispatch had failing
    /// handlers. Errors of mutations inside `work` surface through `work`'s
    /// own return value.
    pub fn transaction<R>(&self, work: impl FnOnce() -> R) -> Result<R, CacheError> {
        self.core.run_txn(|| Ok(work()))
    }

    /// Like [`transaction`](CacheHub::transaction) for async work: the
    /// transaction stays open until the future completes, then dispatches.
    pub async fn transaction_async<F>(&self, work: F) -> Result<F::Output, CacheError>
    where
        F: Future,
    {
        let guard = self.core.begin();
        let out = work.await;
        guard.finish().map(|()| out)
    }

    /// Registers a change handler for every value-type. Returns the handle
    /// controlling the subscription; dropping the handle does not
    /// unregister.
    pub fn register_changed_handler<F>(&self, handler: F) -> ListenerHandle<V>
    where
        F: Fn(&ChangeRecord<V>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(Arc::new(handler), None)
    }

    /// Registers a change handler filtered to the given value-types. An empty
    /// list matches nothing.
    pub fn register_changed_handler_for<I, S, F>(
        &self,
        value_types: I,
        handler: F,
    ) -> ListenerHandle<V>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&ChangeRecord<V>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let filter: Vec<String> = value_types.into_iter().map(Into::into).collect();
        self.register(Arc::new(handler), Some(filter))
    }

    fn register(&self, handler: ChangeHandler<V>, filter: Option<Vec<String>>) -> ListenerHandle<V> {
        let id = self.core.listeners.lock().register(handler, filter);
        ListenerHandle::new(Arc::clone(&self.core.listeners), id)
    }
}

impl<V: Clone + Send + Sync + 'static> Default for CacheHub<V> {
    fn default() -> Self {
        CacheHub::new()
    }
}

impl<V> Clone for CacheHub<V> {
    fn clone(&self) -> Self {
        CacheHub {
            core: Arc::clone(&self.core),
        }
    }
}

impl<V> fmt::Debug for CacheHub<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHub")
            .field("caches", &self.core.caches.lock().len())
            .finish()
    }
}
