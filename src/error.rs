//! Error types for scopewatch.
//!
//! All errors are strongly typed using thiserror.
//! This enables pattern matching on specific error conditions
//! and provides clear error messages.

use std::io;

use thiserror::Error;

use crate::labels::{LabelError, SelectorKey};
use crate::resource::ResourceKind;

/// Errors raised while binding or resolving selector-scoped views.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Selector '{key}' is already bound to kind '{bound}', cannot bind '{requested}'")]
    KindConflict {
        key: SelectorKey,
        bound: ResourceKind,
        requested: ResourceKind,
    },

    #[error("No binding registered for selector '{key}'")]
    UnknownSelector {
        key: SelectorKey,
    },
}

/// Errors raised while attaching to the event source or spawning delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Event source refused a '{kind}' subscription: {reason}")]
    SubscriptionRefused {
        kind: ResourceKind,
        reason: String,
    },

    #[error("Failed to spawn delivery worker: {0}")]
    WorkerSpawn(#[from] io::Error),
}

/// Top-level error type for scopewatch.
///
/// This enum encompasses all possible errors that can occur
/// when binding, starting, or querying watched views.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Label error: {0}")]
    Label(#[from] LabelError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl WatchError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a registry error.
    #[must_use]
    pub const fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// Returns true if this is a delivery error.
    #[must_use]
    pub const fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivery(_))
    }

    /// Returns true if this is a label error.
    #[must_use]
    pub const fn is_label(&self) -> bool {
        matches!(self, Self::Label(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Registry(_) => false, // Binding configuration won't change on retry
            Self::Delivery(_) => true,  // Source refusals and spawn failures can clear
            Self::Label(_) => false,
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for scopewatch operations.
pub type WatchResult<T> = Result<T, WatchError>;

/// Maps a poisoned lock to an internal error naming the lock site.
pub(crate) fn lock_poisoned(context: &'static str) -> WatchError {
    WatchError::internal(format!("lock poisoned: {context}"))
}
