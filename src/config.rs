//! Cache configuration.
//!
//! A [`CacheConfig`] describes a cache at creation time: its entry cap and
//! which removal kinds it reports to listeners. Inserts and delete-removes
//! are always reported; LRU evictions and clear-removes are opt-in because
//! high-churn caches would otherwise flood listeners with eviction noise.

use core::fmt;
use core::num::NonZeroUsize;

/// Default entry cap of a newly created cache.
pub const DEFAULT_MAX_SIZE: usize = 500;

/// Configuration for one cache.
///
/// # Examples
///
/// ```
/// use cachebus::CacheConfig;
///
/// let config = CacheConfig::new()
///     .with_max_size(100)
///     .with_dispatch_lru_removes(true);
///
/// assert_eq!(config.max_size().map(|n| n.get()), Some(100));
/// assert!(config.dispatch_lru_removes());
///
/// // A cap of 0 means unbounded.
/// let unbounded = CacheConfig::new().with_max_size(0);
/// assert_eq!(unbounded.max_size(), None);
/// ```
#[derive(Clone, Copy)]
pub struct CacheConfig {
    max_size: Option<NonZeroUsize>,
    dispatch_lru_removes: bool,
    dispatch_clear_removes: bool,
}

impl CacheConfig {
    /// Creates the default configuration: cap of [`DEFAULT_MAX_SIZE`], no
    /// LRU-remove or clear-remove dispatch.
    pub fn new() -> Self {
        CacheConfig {
            max_size: NonZeroUsize::new(DEFAULT_MAX_SIZE),
            dispatch_lru_removes: false,
            dispatch_clear_removes: false,
        }
    }

    /// Sets the entry cap. `0` means unbounded.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = NonZeroUsize::new(max_size);
        self
    }

    /// Sets whether LRU evictions are reported to listeners.
    pub fn with_dispatch_lru_removes(mut self, dispatch: bool) -> Self {
        self.dispatch_lru_removes = dispatch;
        self
    }

    /// Sets whether `clear` removals are reported to listeners.
    pub fn with_dispatch_clear_removes(mut self, dispatch: bool) -> Self {
        self.dispatch_clear_removes = dispatch;
        self
    }

    /// The entry cap, or `None` when unbounded.
    #[inline]
    pub fn max_size(&self) -> Option<NonZeroUsize> {
        self.max_size
    }

    /// Whether LRU evictions are reported to listeners.
    #[inline]
    pub fn dispatch_lru_removes(&self) -> bool {
        self.dispatch_lru_removes
    }

    /// Whether `clear` removals are reported to listeners.
    #[inline]
    pub fn dispatch_clear_removes(&self) -> bool {
        self.dispatch_clear_removes
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig::new()
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("max_size", &self.max_size)
            .field("dispatch_lru_removes", &self.dispatch_lru_removes)
            .field("dispatch_clear_removes", &self.dispatch_clear_removes)
            .finish()
    }
}
