//! Listener registration and lookup.
//!
//! A listener is a change handler plus an optional value-type filter. The
//! registry keeps three indices so that dispatch can collect the interested
//! handlers for a set of value-types in one pass:
//!
//! - `listeners`: handler id → listener, in registration order,
//! - `by_type`: value-type → ids of *active* listeners filtered to that type,
//! - `all_types`: ids of *active* listeners with no filter.
//!
//! Deactivating a listener removes it from the two active indices without
//! forgetting its registration; activating puts it back. Handlers are invoked
//! in registration order (ascending id).
//!
//! Listeners are never unregistered implicitly: dropping a
//! [`ListenerHandle`] leaves the subscription alive.

use crate::change::ChangeRecord;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Error type change handlers may fail with.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A registered change handler.
pub type ChangeHandler<V> =
    Arc<dyn Fn(&ChangeRecord<V>) -> Result<(), HandlerError> + Send + Sync>;

struct Listener<V> {
    handler: ChangeHandler<V>,
    /// `None` matches every value-type; an empty list matches none.
    filter: Option<Vec<String>>,
    active: bool,
}

/// Registry of change listeners with per-value-type lookup.
pub(crate) struct ListenerRegistry<V> {
    listeners: BTreeMap<u64, Listener<V>>,
    by_type: HashMap<String, BTreeSet<u64>>,
    all_types: BTreeSet<u64>,
    next_id: u64,
}

impl<V> ListenerRegistry<V> {
    pub(crate) fn new() -> Self {
        ListenerRegistry {
            listeners: BTreeMap::new(),
            by_type: HashMap::new(),
            all_types: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Registers `handler` with the given filter (`None` = all value-types)
    /// and returns its id. New listeners start active.
    pub(crate) fn register(&mut self, handler: ChangeHandler<V>, filter: Option<Vec<String>>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.index_insert(id, filter.as_deref());
        self.listeners.insert(
            id,
            Listener {
                handler,
                filter,
                active: true,
            },
        );
        id
    }

    /// Removes the listener entirely. Returns false if the id is unknown.
    pub(crate) fn unregister(&mut self, id: u64) -> bool {
        match self.listeners.remove(&id) {
            Some(listener) => {
                self.index_remove(id, listener.filter.as_deref());
                true
            }
            None => false,
        }
    }

    /// Toggles a listener's activation, updating the active indices. Returns
    /// false if the id is unknown.
    pub(crate) fn set_active(&mut self, id: u64, active: bool) -> bool {
        let Some(listener) = self.listeners.get_mut(&id) else {
            return false;
        };
        if listener.active == active {
            return true;
        }
        listener.active = active;
        let filter = listener.filter.clone();
        if active {
            self.index_insert(id, filter.as_deref());
        } else {
            self.index_remove(id, filter.as_deref());
        }
        true
    }

    pub(crate) fn is_registered(&self, id: u64) -> bool {
        self.listeners.contains_key(&id)
    }

    /// Returns true if any active listener would receive changes for
    /// `value_type`.
    pub(crate) fn has_interest(&self, value_type: &str) -> bool {
        if !self.all_types.is_empty() {
            return true;
        }
        self.by_type
            .get(value_type)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// Collects the handlers interested in any of `value_types`, in
    /// registration order.
    pub(crate) fn handlers_for<'a, I>(&self, value_types: I) -> Vec<ChangeHandler<V>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut ids: BTreeSet<u64> = self.all_types.clone();
        for value_type in value_types {
            if let Some(type_ids) = self.by_type.get(value_type) {
                ids.extend(type_ids.iter().copied());
            }
        }
        ids.iter()
            .filter_map(|id| self.listeners.get(id))
            .map(|listener| Arc::clone(&listener.handler))
            .collect()
    }

    fn index_insert(&mut self, id: u64, filter: Option<&[String]>) {
        match filter {
            None => {
                self.all_types.insert(id);
            }
            Some(value_types) => {
                for value_type in value_types {
                    self.by_type.entry(value_type.clone()).or_default().insert(id);
                }
            }
        }
    }

    fn index_remove(&mut self, id: u64, filter: Option<&[String]>) {
        match filter {
            None => {
                self.all_types.remove(&id);
            }
            Some(value_types) => {
                for value_type in value_types {
                    if let Some(ids) = self.by_type.get_mut(value_type) {
                        ids.remove(&id);
                        if ids.is_empty() {
                            self.by_type.remove(value_type);
                        }
                    }
                }
            }
        }
    }
}

impl<V> fmt::Debug for ListenerRegistry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .field("all_types", &self.all_types.len())
            .finish()
    }
}

/// Handle to a registered change listener.
///
/// The handle controls the subscription but does not own it: dropping the
/// handle leaves the listener registered. Call [`unregister`] to remove it.
///
/// [`unregister`]: ListenerHandle::unregister
pub struct ListenerHandle<V> {
    registry: Arc<Mutex<ListenerRegistry<V>>>,
    id: u64,
}

impl<V> ListenerHandle<V> {
    pub(crate) fn new(registry: Arc<Mutex<ListenerRegistry<V>>>, id: u64) -> Self {
        ListenerHandle { registry, id }
    }

    /// Removes the listener from the registry. Returns false if it was
    /// already unregistered.
    pub fn unregister(&self) -> bool {
        self.registry.lock().unregister(self.id)
    }

    /// Resumes delivery to this listener. Returns false if it was
    /// unregistered.
    pub fn activate(&self) -> bool {
        self.registry.lock().set_active(self.id, true)
    }

    /// Pauses delivery to this listener without unregistering it. Returns
    /// false if it was unregistered.
    pub fn deactivate(&self) -> bool {
        self.registry.lock().set_active(self.id, false)
    }

    /// Returns true while the listener is registered (active or not).
    pub fn is_registered(&self) -> bool {
        self.registry.lock().is_registered(self.id)
    }
}

impl<V> fmt::Debug for ListenerHandle<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> ChangeHandler<i32> {
        Arc::new(|_record| Ok(()))
    }

    #[test]
    fn test_listener_register_and_lookup() {
        let mut registry: ListenerRegistry<i32> = ListenerRegistry::new();
        let all = registry.register(noop_handler(), None);
        let t1 = registry.register(noop_handler(), Some(vec!["T1".to_owned()]));
        let _t2 = registry.register(noop_handler(), Some(vec!["T2".to_owned()]));

        assert!(registry.is_registered(all));
        assert!(registry.has_interest("T1"));
        assert!(registry.has_interest("anything"), "all-types listener matches everything");

        assert_eq!(registry.handlers_for(["T1"]).len(), 2);
        assert_eq!(registry.handlers_for(["T1", "T2"]).len(), 3);

        registry.unregister(all);
        registry.unregister(t1);
        assert_eq!(registry.handlers_for(["T1"]).len(), 0);
        assert!(!registry.has_interest("T1"));
        assert!(registry.has_interest("T2"));
    }

    #[test]
    fn test_listener_empty_filter_matches_nothing() {
        let mut registry: ListenerRegistry<i32> = ListenerRegistry::new();
        let id = registry.register(noop_handler(), Some(Vec::new()));
        assert!(registry.is_registered(id));
        assert!(!registry.has_interest("T1"));
        assert!(registry.handlers_for(["T1"]).is_empty());
    }

    #[test]
    fn test_listener_deactivate_and_activate() {
        let mut registry: ListenerRegistry<i32> = ListenerRegistry::new();
        let id = registry.register(noop_handler(), Some(vec!["T1".to_owned()]));

        assert!(registry.set_active(id, false));
        assert!(registry.is_registered(id), "deactivation keeps registration");
        assert!(!registry.has_interest("T1"));
        assert!(registry.handlers_for(["T1"]).is_empty());

        assert!(registry.set_active(id, true));
        assert!(registry.has_interest("T1"));
        assert_eq!(registry.handlers_for(["T1"]).len(), 1);
    }

    #[test]
    fn test_listener_set_active_is_idempotent() {
        let mut registry: ListenerRegistry<i32> = ListenerRegistry::new();
        let id = registry.register(noop_handler(), None);
        assert!(registry.set_active(id, true));
        assert!(registry.set_active(id, false));
        assert!(registry.set_active(id, false));
        assert!(!registry.has_interest("T1"));
        assert!(!registry.set_active(999, true));
    }

    #[test]
    fn test_listener_handle_operations() {
        let registry = Arc::new(Mutex::new(ListenerRegistry::<i32>::new()));
        let id = registry.lock().register(noop_handler(), None);
        let handle = ListenerHandle::new(Arc::clone(&registry), id);

        assert!(handle.is_registered());
        assert!(handle.deactivate());
        assert!(handle.activate());
        assert!(handle.unregister());
        assert!(!handle.is_registered());
        assert!(!handle.activate(), "operations on an unregistered listener report failure");
    }
}
