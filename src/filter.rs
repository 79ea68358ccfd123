//! Reclassifies raw events against one selector scope.
//!
//! The watch mechanism reports what happened to a resource; a scope cares
//! about what happened to its membership. A label mutation can carry a
//! resource across the selector boundary, so a raw `Modified` event becomes
//! an add, an update, or a delete depending on which sides of the boundary
//! the two payloads fall on.

use std::sync::Arc;

use crate::error::WatchResult;
use crate::labels::Selector;
use crate::resource::WatchedResource;
use crate::source::RawEvent;
use crate::view::ScopedCache;

/// Applies scope semantics to one cache.
///
/// Evaluation is pure: the filter holds no state beyond the selector and the
/// cache it feeds, so one instance can be driven from any number of events
/// in sequence.
#[derive(Debug)]
pub struct TransitionFilter<T: WatchedResource> {
    selector: Selector,
    cache: Arc<ScopedCache<T>>,
}

impl<T: WatchedResource> TransitionFilter<T> {
    /// Creates a filter feeding `cache` with events admitted by `selector`.
    #[must_use]
    pub fn new(selector: Selector, cache: Arc<ScopedCache<T>>) -> Self {
        Self { selector, cache }
    }

    /// The selector defining this filter's scope.
    #[must_use]
    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    fn admits(&self, obj: &T) -> bool {
        self.selector.matches(obj.labels())
    }

    /// Applies one raw event to the scoped cache.
    ///
    /// `Modified` events are reclassified: in-scope on both sides is an
    /// update, leaving the scope is a delete of the old payload, entering
    /// is an add of the new one, and fully out-of-scope events are dropped.
    ///
    /// # Errors
    /// Propagates cache failures (poisoned locks).
    pub fn apply(&self, event: RawEvent<T>) -> WatchResult<()> {
        match event {
            RawEvent::Added { object } => {
                if self.admits(&object) {
                    self.cache.add(object)
                } else {
                    Ok(())
                }
            }
            RawEvent::Modified { old, new } => match (self.admits(&old), self.admits(&new)) {
                (true, true) => self.cache.update(&old, new),
                (true, false) => self.cache.delete(&old),
                (false, true) => self.cache.add(new),
                (false, false) => Ok(()),
            },
            RawEvent::Deleted { object } => {
                if self.admits(&object) {
                    self.cache.delete(&object)
                } else {
                    Ok(())
                }
            }
        }
    }
}
