//! Selector-scoped resource cache.
//!
//! A [`ScopedCache`] holds the current members of one selector scope, keyed
//! by resource name, and drives the registered [`ViewHandlers`] as members
//! enter, change, and leave. Mutations come only from the delivery path;
//! readers get point-in-time clones and never observe a torn state.
//!
//! Counts reported to the count handler are read inside the mutating
//! critical section, so a burst of concurrent events still produces counts
//! that each match the cache size at the moment of that mutation. Handlers
//! run after the lock is released and may query the cache freely.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{lock_poisoned, WatchResult};
use crate::labels::SelectorKey;
use crate::resource::WatchedResource;

/// Callback slots for one scoped view.
///
/// Slots left unset are quiet; on re-registration against the same scope,
/// unset slots keep whatever handler was registered before, so callers can
/// extend a view's callbacks without restating them all.
#[derive(Clone)]
pub struct ViewHandlers<T> {
    on_add: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    on_update: Option<Arc<dyn Fn(&T, &T) + Send + Sync>>,
    on_delete: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    on_count_changed: Option<Arc<dyn Fn(usize) + Send + Sync>>,
}

impl<T> ViewHandlers<T> {
    /// Creates an empty handler set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoked with the object when it enters the scope.
    #[must_use]
    pub fn on_add(mut self, handler: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_add = Some(Arc::new(handler));
        self
    }

    /// Invoked with the previous and current object on an in-scope change.
    #[must_use]
    pub fn on_update(mut self, handler: impl Fn(&T, &T) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Arc::new(handler));
        self
    }

    /// Invoked with the last seen object when it leaves the scope.
    #[must_use]
    pub fn on_delete(mut self, handler: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Arc::new(handler));
        self
    }

    /// Invoked with the new member count after an add or delete.
    #[must_use]
    pub fn on_count_changed(mut self, handler: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_count_changed = Some(Arc::new(handler));
        self
    }
}

impl<T> Default for ViewHandlers<T> {
    fn default() -> Self {
        Self {
            on_add: None,
            on_update: None,
            on_delete: None,
            on_count_changed: None,
        }
    }
}

impl<T> fmt::Debug for ViewHandlers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandlers")
            .field("on_add", &self.on_add.is_some())
            .field("on_update", &self.on_update.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .field("on_count_changed", &self.on_count_changed.is_some())
            .finish()
    }
}

/// The live members of one selector scope.
///
/// Handed out by the registry; mutations arrive only through the delivery
/// machinery, readers use [`get`](Self::get) and [`list`](Self::list).
pub struct ScopedCache<T: WatchedResource> {
    scope: SelectorKey,
    entries: RwLock<HashMap<String, T>>,
    handlers: RwLock<ViewHandlers<T>>,
}

impl<T: WatchedResource> ScopedCache<T> {
    pub(crate) fn new(scope: SelectorKey) -> Self {
        Self {
            scope,
            entries: RwLock::new(HashMap::new()),
            handlers: RwLock::new(ViewHandlers::default()),
        }
    }

    /// The selector key this cache is scoped to.
    #[must_use]
    pub fn scope(&self) -> &SelectorKey {
        &self.scope
    }

    /// Returns a clone of the member with the given name.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn get(&self, name: &str) -> WatchResult<Option<T>> {
        let entries = self.entries.read().map_err(|_| lock_poisoned("view.get"))?;
        Ok(entries.get(name).cloned())
    }

    /// Returns clones of all current members, sorted by name.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn list(&self) -> WatchResult<Vec<T>> {
        let entries = self.entries.read().map_err(|_| lock_poisoned("view.list"))?;
        let mut items: Vec<T> = entries.values().cloned().collect();
        drop(entries);
        items.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(items)
    }

    /// Current member count.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn len(&self) -> WatchResult<usize> {
        let entries = self.entries.read().map_err(|_| lock_poisoned("view.len"))?;
        Ok(entries.len())
    }

    /// Returns true if the scope has no members.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn is_empty(&self) -> WatchResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Merges handler slots into this view, replacing only the slots that
    /// are set on `incoming`.
    pub(crate) fn register(&self, incoming: ViewHandlers<T>) -> WatchResult<()> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| lock_poisoned("view.register"))?;
        if incoming.on_add.is_some() {
            handlers.on_add = incoming.on_add;
        }
        if incoming.on_update.is_some() {
            handlers.on_update = incoming.on_update;
        }
        if incoming.on_delete.is_some() {
            handlers.on_delete = incoming.on_delete;
        }
        if incoming.on_count_changed.is_some() {
            handlers.on_count_changed = incoming.on_count_changed;
        }
        Ok(())
    }

    fn snapshot_handlers(&self) -> WatchResult<ViewHandlers<T>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| lock_poisoned("view.handlers"))?;
        Ok(handlers.clone())
    }

    /// Admits an object into the scope.
    ///
    /// A second add for a name already present keeps the first payload and
    /// fires only the update handler; membership did not change, so no count
    /// signal is emitted.
    pub(crate) fn add(&self, obj: T) -> WatchResult<()> {
        let name = obj.name().to_string();
        let (previous, count) = {
            let mut entries = self.entries.write().map_err(|_| lock_poisoned("view.add"))?;
            let previous = match entries.entry(name) {
                Entry::Occupied(slot) => Some(slot.get().clone()),
                Entry::Vacant(slot) => {
                    slot.insert(obj.clone());
                    None
                }
            };
            (previous, entries.len())
        };

        let handlers = self.snapshot_handlers()?;
        match previous {
            Some(first) => {
                if let Some(on_update) = handlers.on_update {
                    on_update(&first, &obj);
                }
            }
            None => {
                if let Some(on_add) = handlers.on_add {
                    on_add(&obj);
                }
                if let Some(on_count) = handlers.on_count_changed {
                    on_count(count);
                }
            }
        }
        Ok(())
    }

    /// Replaces the old identity with the new one.
    ///
    /// The old entry is removed best-effort (it may never have been seen),
    /// then the new payload is stored under its own name. An update never
    /// emits a count signal.
    pub(crate) fn update(&self, old: &T, new: T) -> WatchResult<()> {
        {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| lock_poisoned("view.update"))?;
            entries.remove(old.name());
            entries.insert(new.name().to_string(), new.clone());
        }

        let handlers = self.snapshot_handlers()?;
        if let Some(on_update) = handlers.on_update {
            on_update(old, &new);
        }
        Ok(())
    }

    /// Evicts an object from the scope.
    ///
    /// The delete handler receives the payload carried by the event, not the
    /// stored one. A delete for an untracked name is a silent no-op.
    pub(crate) fn delete(&self, obj: &T) -> WatchResult<()> {
        let removed = {
            let mut entries = self
                .entries
                .write()
                .map_err(|_| lock_poisoned("view.delete"))?;
            entries.remove(obj.name()).map(|_| entries.len())
        };

        let Some(count) = removed else {
            debug!(scope = %self.scope, name = obj.name(), "ignoring delete for untracked resource");
            return Ok(());
        };

        let handlers = self.snapshot_handlers()?;
        if let Some(on_delete) = handlers.on_delete {
            on_delete(obj);
        }
        if let Some(on_count) = handlers.on_count_changed {
            on_count(count);
        }
        Ok(())
    }
}

impl<T: WatchedResource> fmt::Debug for ScopedCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCache")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}
