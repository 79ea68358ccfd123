//! Selector-keyed registry of scoped views and their delivery workers.
//!
//! The registry owns the binding table: each selector key maps to exactly
//! one resource kind for the registry's lifetime. Registering against a key
//! bound to another kind is a hard error that leaves the existing binding
//! untouched. Starting a binding subscribes to the matching feed and spawns
//! a dedicated worker thread that drives raw events through the scope's
//! transition filter until told to stop.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::{select, Receiver};
use tracing::{debug, error};

use crate::error::{lock_poisoned, DeliveryError, RegistryError, WatchResult};
use crate::filter::TransitionFilter;
use crate::labels::{Selector, SelectorKey};
use crate::resource::{Deployment, Node, Pod, ResourceKind, WatchedResource};
use crate::source::{EventFeed, RawEvent, WatchSource};
use crate::view::{ScopedCache, ViewHandlers};

/// One selector's bound cache, tagged with its kind.
#[derive(Debug, Clone)]
enum Binding {
    Node(Arc<ScopedCache<Node>>),
    Pod(Arc<ScopedCache<Pod>>),
    Deployment(Arc<ScopedCache<Deployment>>),
}

impl Binding {
    const fn kind(&self) -> ResourceKind {
        match self {
            Self::Node(_) => ResourceKind::Node,
            Self::Pod(_) => ResourceKind::Pod,
            Self::Deployment(_) => ResourceKind::Deployment,
        }
    }
}

/// Wires a resource type to its binding variant and feed.
///
/// Keeping this closed (and private) is what lets the registry hold mixed
/// kinds without downcasting.
trait Bindable: WatchedResource {
    fn wrap(cache: Arc<ScopedCache<Self>>) -> Binding;
    fn cache(binding: &Binding) -> Option<Arc<ScopedCache<Self>>>;
    fn feed(source: &dyn WatchSource) -> Arc<dyn EventFeed<Self>>;
}

impl Bindable for Node {
    fn wrap(cache: Arc<ScopedCache<Self>>) -> Binding {
        Binding::Node(cache)
    }

    fn cache(binding: &Binding) -> Option<Arc<ScopedCache<Self>>> {
        match binding {
            Binding::Node(cache) => Some(Arc::clone(cache)),
            _ => None,
        }
    }

    fn feed(source: &dyn WatchSource) -> Arc<dyn EventFeed<Self>> {
        source.node_feed()
    }
}

impl Bindable for Pod {
    fn wrap(cache: Arc<ScopedCache<Self>>) -> Binding {
        Binding::Pod(cache)
    }

    fn cache(binding: &Binding) -> Option<Arc<ScopedCache<Self>>> {
        match binding {
            Binding::Pod(cache) => Some(Arc::clone(cache)),
            _ => None,
        }
    }

    fn feed(source: &dyn WatchSource) -> Arc<dyn EventFeed<Self>> {
        source.pod_feed()
    }
}

impl Bindable for Deployment {
    fn wrap(cache: Arc<ScopedCache<Self>>) -> Binding {
        Binding::Deployment(cache)
    }

    fn cache(binding: &Binding) -> Option<Arc<ScopedCache<Self>>> {
        match binding {
            Binding::Deployment(cache) => Some(Arc::clone(cache)),
            _ => None,
        }
    }

    fn feed(source: &dyn WatchSource) -> Arc<dyn EventFeed<Self>> {
        source.deployment_feed()
    }
}

/// Registry of selector-scoped views over one watch source.
///
/// Selector keys are the unit of binding: the first registration against a
/// key fixes its resource kind, later registrations of the same kind merge
/// their handler slots into the existing view.
pub struct WatchRegistry {
    source: Arc<dyn WatchSource>,
    bindings: RwLock<HashMap<SelectorKey, Binding>>,
}

impl WatchRegistry {
    /// Creates a registry over the given source.
    #[must_use]
    pub fn new(source: Arc<dyn WatchSource>) -> Self {
        Self {
            source,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    fn listen<T: Bindable>(&self, selector: &Selector, handlers: ViewHandlers<T>) -> WatchResult<()> {
        let key = selector.key();
        let mut bindings = self
            .bindings
            .write()
            .map_err(|_| lock_poisoned("registry.listen"))?;
        match bindings.entry(key) {
            Entry::Occupied(slot) => {
                let Some(cache) = T::cache(slot.get()) else {
                    return Err(RegistryError::KindConflict {
                        key: slot.key().clone(),
                        bound: slot.get().kind(),
                        requested: T::KIND,
                    }
                    .into());
                };
                cache.register(handlers)
            }
            Entry::Vacant(slot) => {
                let cache = Arc::new(ScopedCache::new(slot.key().clone()));
                cache.register(handlers)?;
                debug!(scope = %slot.key(), kind = %T::KIND, "bound scope");
                slot.insert(T::wrap(cache));
                Ok(())
            }
        }
    }

    /// Registers node handlers for a selector scope.
    ///
    /// # Errors
    /// Returns [`RegistryError::KindConflict`] when the selector is already
    /// bound to a different kind.
    pub fn listen_nodes(&self, selector: &Selector, handlers: ViewHandlers<Node>) -> WatchResult<()> {
        self.listen(selector, handlers)
    }

    /// Registers pod handlers for a selector scope.
    ///
    /// # Errors
    /// Returns [`RegistryError::KindConflict`] when the selector is already
    /// bound to a different kind.
    pub fn listen_pods(&self, selector: &Selector, handlers: ViewHandlers<Pod>) -> WatchResult<()> {
        self.listen(selector, handlers)
    }

    /// Registers deployment handlers for a selector scope.
    ///
    /// # Errors
    /// Returns [`RegistryError::KindConflict`] when the selector is already
    /// bound to a different kind.
    pub fn listen_deployments(
        &self,
        selector: &Selector,
        handlers: ViewHandlers<Deployment>,
    ) -> WatchResult<()> {
        self.listen(selector, handlers)
    }

    fn view<T: Bindable>(&self, selector: &Selector) -> WatchResult<Arc<ScopedCache<T>>> {
        let key = selector.key();
        let bindings = self
            .bindings
            .read()
            .map_err(|_| lock_poisoned("registry.view"))?;
        let Some(binding) = bindings.get(&key) else {
            return Err(RegistryError::UnknownSelector { key }.into());
        };
        match T::cache(binding) {
            Some(cache) => Ok(cache),
            None => Err(RegistryError::KindConflict {
                key,
                bound: binding.kind(),
                requested: T::KIND,
            }
            .into()),
        }
    }

    /// The node view bound to a selector.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownSelector`] for an unbound selector and
    /// [`RegistryError::KindConflict`] when it is bound to another kind.
    pub fn nodes(&self, selector: &Selector) -> WatchResult<Arc<ScopedCache<Node>>> {
        self.view(selector)
    }

    /// The pod view bound to a selector.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownSelector`] for an unbound selector and
    /// [`RegistryError::KindConflict`] when it is bound to another kind.
    pub fn pods(&self, selector: &Selector) -> WatchResult<Arc<ScopedCache<Pod>>> {
        self.view(selector)
    }

    /// The deployment view bound to a selector.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownSelector`] for an unbound selector and
    /// [`RegistryError::KindConflict`] when it is bound to another kind.
    pub fn deployments(&self, selector: &Selector) -> WatchResult<Arc<ScopedCache<Deployment>>> {
        self.view(selector)
    }

    /// Reports which kind a selector is bound to, if any.
    ///
    /// # Errors
    /// Fails only on a poisoned lock.
    pub fn kind_of(&self, selector: &Selector) -> WatchResult<Option<ResourceKind>> {
        let bindings = self
            .bindings
            .read()
            .map_err(|_| lock_poisoned("registry.kind_of"))?;
        Ok(bindings.get(&selector.key()).map(Binding::kind))
    }

    /// Subscribes the selector's binding to its feed and spawns delivery.
    ///
    /// The worker runs until `stop` yields a message or its sender is
    /// dropped, whichever comes first; it also exits when the feed itself
    /// disconnects. Each call attaches a fresh subscription and worker.
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownSelector`] when nothing is bound, and
    /// [`DeliveryError`] when the source refuses the subscription or the
    /// worker cannot be spawned.
    pub fn start(&self, selector: &Selector, stop: Receiver<()>) -> WatchResult<()> {
        let key = selector.key();
        let binding = {
            let bindings = self
                .bindings
                .read()
                .map_err(|_| lock_poisoned("registry.start"))?;
            bindings.get(&key).cloned()
        };
        let Some(binding) = binding else {
            return Err(RegistryError::UnknownSelector { key }.into());
        };
        match binding {
            Binding::Node(cache) => self.spawn_delivery(selector, cache, stop),
            Binding::Pod(cache) => self.spawn_delivery(selector, cache, stop),
            Binding::Deployment(cache) => self.spawn_delivery(selector, cache, stop),
        }
    }

    fn spawn_delivery<T: Bindable>(
        &self,
        selector: &Selector,
        cache: Arc<ScopedCache<T>>,
        stop: Receiver<()>,
    ) -> WatchResult<()> {
        let feed = T::feed(self.source.as_ref());
        let events = feed.subscribe().map_err(|err| DeliveryError::SubscriptionRefused {
            kind: T::KIND,
            reason: err.to_string(),
        })?;

        let filter = TransitionFilter::new(selector.clone(), cache);
        // The handle is dropped on purpose: the worker detaches and exits on
        // stop or feed disconnect.
        thread::Builder::new()
            .name(format!("scopewatch-{}", T::KIND))
            .spawn(move || deliver(filter, events, stop))
            .map_err(DeliveryError::WorkerSpawn)?;
        Ok(())
    }
}

impl fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = self.bindings.read().map(|b| b.len()).unwrap_or(0);
        f.debug_struct("WatchRegistry")
            .field("bindings", &bound)
            .finish_non_exhaustive()
    }
}

fn deliver<T: WatchedResource>(
    filter: TransitionFilter<T>,
    events: Receiver<RawEvent<T>>,
    stop: Receiver<()>,
) {
    let scope = filter.selector().key();
    debug!(scope = %scope, kind = %T::KIND, "delivery worker started");

    loop {
        select! {
            recv(stop) -> _ => {
                // A message and a dropped sender both mean shut down.
                break;
            }
            recv(events) -> msg => match msg {
                Ok(event) => {
                    if let Err(err) = filter.apply(event) {
                        error!(scope = %scope, error = %err, "delivery halted by cache failure");
                        return;
                    }
                }
                Err(_) => break, // feed closed upstream
            },
        }
    }

    debug!(scope = %scope, kind = %T::KIND, "delivery worker stopped");
}
