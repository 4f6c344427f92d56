//! Error surface of the cache library.

use crate::listener::HandlerError;
use thiserror::Error;

/// Errors raised by cache operations.
///
/// Validation errors (`AlternateKeyConflict`, `NoEntryGetter`) abort only the
/// failing operation; the cache keeps its pre-call state, except that entries
/// already applied by an earlier step of a batch stay applied.
/// `HandlerFailures` is raised after a dispatch in which one or more change
/// handlers failed; cache state is consistent regardless of handler outcome.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An alternate key is already bound to a different primary key in the
    /// same cache.
    #[error(
        "alternate key {alt_key:?} of entry {requested:?} in cache {value_type:?} \
         is already bound to entry {existing:?}"
    )]
    AlternateKeyConflict {
        /// The conflicting alternate key.
        alt_key: String,
        /// The cache's value-type.
        value_type: String,
        /// The primary key that tried to claim the alternate key.
        requested: String,
        /// The primary key the alternate key is already bound to.
        existing: String,
    },

    /// A bypass-cache lookup was requested but no entry getter is available.
    #[error("no entry getter available for key {key:?} in cache {value_type:?}")]
    NoEntryGetter {
        /// The requested key.
        key: String,
        /// The cache's value-type.
        value_type: String,
    },

    /// One or more change handlers failed during dispatch. All handlers were
    /// invoked before this was raised.
    #[error("{} of {invoked} change handlers failed", .errors.len())]
    HandlerFailures {
        /// Number of handlers that were invoked for the dispatch.
        invoked: usize,
        /// The errors the failing handlers returned, in invocation order.
        errors: Vec<HandlerError>,
    },
}
