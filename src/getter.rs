//! Entry getters and async plumbing.
//!
//! An entry getter populates a cache on miss. Getters come in two shapes,
//! selected at registration time:
//!
//! - [`EntryGetter::Sync`] produces the entry (or nothing) immediately and is
//!   serviced by the synchronous lookup path ([`Cache::get`]).
//! - [`EntryGetter::Async`] produces a future; it is serviced by
//!   [`Cache::fetch`], which memoizes the in-flight future per key so that
//!   concurrent fetches of the same missing key share one invocation.
//!
//! Getter closures run without any cache lock held *except* the brief moment
//! an async getter constructs its future, so a getter must not synchronously
//! call back into its own cache while building the future. The future body
//! itself is free to use the cache.
//!
//! [`Cache::get`]: crate::Cache::get
//! [`Cache::fetch`]: crate::Cache::fetch

use crate::entry::CacheEntry;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Signature of a synchronous entry getter.
pub type SyncGetterFn<V> = dyn Fn(&str) -> Option<CacheEntry<V>> + Send + Sync;

/// Signature of an asynchronous entry getter.
pub type AsyncGetterFn<V> =
    dyn Fn(&str) -> BoxFuture<'static, Option<CacheEntry<V>>> + Send + Sync;

/// A cache-miss populator: synchronous or asynchronous.
///
/// # Examples
///
/// ```
/// use cachebus::{CacheEntry, EntryGetter};
///
/// let sync = EntryGetter::sync(|key| Some(CacheEntry::new(key, format!("{key}_v"))));
///
/// let lazy = EntryGetter::async_fn(|key: String| async move {
///     Some(CacheEntry::new(key.clone(), format!("{key}_v")))
/// });
/// # let _ = (sync, lazy);
/// ```
pub enum EntryGetter<V> {
    /// Resolves immediately.
    Sync(Arc<SyncGetterFn<V>>),
    /// Resolves through a future.
    Async(Arc<AsyncGetterFn<V>>),
}

impl<V> EntryGetter<V> {
    /// Wraps a synchronous getter function.
    pub fn sync<F>(getter: F) -> Self
    where
        F: Fn(&str) -> Option<CacheEntry<V>> + Send + Sync + 'static,
    {
        EntryGetter::Sync(Arc::new(getter))
    }

    /// Wraps an asynchronous getter function. The function receives the
    /// requested key by value so the returned future can own it.
    pub fn async_fn<F, Fut>(getter: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<CacheEntry<V>>> + Send + 'static,
    {
        EntryGetter::Async(Arc::new(move |key: &str| getter(key.to_owned()).boxed()))
    }
}

impl<V> Clone for EntryGetter<V> {
    fn clone(&self) -> Self {
        match self {
            EntryGetter::Sync(getter) => EntryGetter::Sync(Arc::clone(getter)),
            EntryGetter::Async(getter) => EntryGetter::Async(Arc::clone(getter)),
        }
    }
}

impl<V> fmt::Debug for EntryGetter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryGetter::Sync(_) => f.write_str("EntryGetter::Sync"),
            EntryGetter::Async(_) => f.write_str("EntryGetter::Async"),
        }
    }
}

/// A memoized in-flight async fetch, shareable across concurrent callers.
pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Option<CacheEntry<V>>>>;

/// Book-keeping for one pending fetch. The token identifies this particular
/// fetch so that a mutation of the key (which removes the memo) invalidates
/// exactly this resolution and no later one.
pub(crate) struct PendingFetch<V> {
    pub(crate) token: u64,
    pub(crate) shared: SharedFetch<V>,
}

/// Future that yields to the scheduler exactly once before completing.
///
/// Used by the deferred-set operations, which run their synchronous body one
/// scheduling turn after the call.
pub(crate) struct YieldOnce {
    yielded: bool,
}

pub(crate) fn yield_once() -> YieldOnce {
    YieldOnce { yielded: false }
}

impl Future for YieldOnce {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            Poll::Ready(())
        } else {
            this.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
