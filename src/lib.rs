//! # scopewatch - Label-scoped live views over watch streams
//!
//! scopewatch turns a push-based stream of resource lifecycle events into
//! queryable, label-filtered in-memory views. Consumers describe the slice
//! of the world they care about with a selector, attach callbacks, and read
//! the view like a local map while delivery workers keep it current.
//!
//! ## Core Concepts
//!
//! - **Selector**: equality constraints over labels; its canonical key names a scope
//! - **ScopedCache**: the live members of one scope, queryable and callback-driven
//! - **TransitionFilter**: reclassifies raw events crossing the scope boundary
//! - **WatchRegistry**: binds selectors to resource kinds and runs delivery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use crossbeam_channel::bounded;
//! use scopewatch::{
//!     InMemorySource, LabelSet, Selector, ViewHandlers, WatchRegistry, WatchedResource,
//! };
//!
//! let source = Arc::new(InMemorySource::new());
//! let registry = WatchRegistry::new(source.clone());
//!
//! // Bind the scope and wire callbacks.
//! let selector = Selector::new(LabelSet::try_from_pairs([("run", "api")])?);
//! registry.listen_pods(
//!     &selector,
//!     ViewHandlers::new()
//!         .on_add(|pod| println!("pod {} entered scope", pod.name()))
//!         .on_count_changed(|count| println!("{count} pods in scope")),
//! )?;
//!
//! // Start delivery; dropping stop_tx (or sending a unit) stops it.
//! let (stop_tx, stop_rx) = bounded(1);
//! registry.start(&selector, stop_rx)?;
//!
//! // Query the live view at any point.
//! let pods = registry.pods(&selector)?.list()?;
//! drop(stop_tx);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod labels;
pub mod resource;

// Event flow: source feeds, scope filtering, live views
pub mod filter;
pub mod registry;
pub mod source;
pub mod view;

// Fleet-shared admission limits
pub mod limiter;

// Re-export primary types at crate root for convenience
pub use error::{DeliveryError, RegistryError, WatchError, WatchResult};
pub use filter::TransitionFilter;
pub use labels::{LabelError, LabelSet, Selector, SelectorKey};
pub use limiter::{LimiterError, QpsLimiterSet};
pub use registry::WatchRegistry;
pub use resource::{Deployment, Node, ObjectMeta, Pod, PodPhase, ResourceKind, WatchedResource};
pub use source::{EventFeed, FeedError, InMemoryFeed, InMemorySource, RawEvent, WatchSource};
pub use view::{ScopedCache, ViewHandlers};
