//! Cache entry type.
//!
//! Provides the `CacheEntry<V>` structure that holds a primary key, a value,
//! and the set of alternate keys under which the entry can also be looked up.
//! Entries are the unit stored in a cache and the unit snapshotted into
//! change records.
//!
//! # Key Model
//!
//! - The **primary key** identifies the entry and is unique within a cache.
//! - **Alternate keys** are secondary identifiers usable for lookup. They are
//!   unique within a cache and disjoint across entries. Updating an entry
//!   extends its alternate-key set (union semantics); alternate keys are never
//!   silently dropped by an update.
//!
//! Recency is tracked by list position inside the cache, so entries carry no
//! per-entry timestamps.

use std::collections::BTreeSet;
use std::fmt;

/// A cached unit: primary key, payload value, and alternate keys.
///
/// # Examples
///
/// ```
/// use cachebus::CacheEntry;
///
/// let entry = CacheEntry::new("user:42", "Alice")
///     .with_alternate_key("login:alice")
///     .with_alternate_key("mail:alice@example.com");
///
/// assert_eq!(entry.key, "user:42");
/// assert_eq!(entry.value, "Alice");
/// assert!(entry.has_alternate_key("login:alice"));
/// ```
pub struct CacheEntry<V> {
    /// The primary key. Unique within a cache.
    pub key: String,

    /// The cached payload.
    pub value: V,

    /// Alternate keys this entry can be looked up by. Possibly empty.
    pub alternate_keys: BTreeSet<String>,
}

impl<V> CacheEntry<V> {
    /// Creates an entry with no alternate keys.
    #[inline]
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
            alternate_keys: BTreeSet::new(),
        }
    }

    /// Adds a single alternate key.
    #[inline]
    pub fn with_alternate_key(mut self, alt_key: impl Into<String>) -> Self {
        self.alternate_keys.insert(alt_key.into());
        self
    }

    /// Adds every alternate key from the iterator.
    pub fn with_alternate_keys<I, S>(mut self, alt_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternate_keys.extend(alt_keys.into_iter().map(Into::into));
        self
    }

    /// Returns true if `alt_key` is one of this entry's alternate keys.
    #[inline]
    pub fn has_alternate_key(&self, alt_key: &str) -> bool {
        self.alternate_keys.contains(alt_key)
    }
}

impl<V: Clone> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            alternate_keys: self.alternate_keys.clone(),
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for CacheEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("alternate_keys", &self.alternate_keys)
            .finish()
    }
}
