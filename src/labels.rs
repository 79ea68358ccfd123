//! Label sets, equality selectors, and canonical selector keys.
//!
//! A [`LabelSet`] is the labelling side of a resource; a [`Selector`] is the
//! matching side. Selectors are pure predicates: evaluating one has no side
//! effects and is safe to call concurrently and repeatedly. The selector's
//! canonical string form ([`SelectorKey`]) is the only valid registry key
//! derivation, computed once and reused.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NAME_MAX_LEN: usize = 63;
const PREFIX_MAX_LEN: usize = 253;
const VALUE_MAX_LEN: usize = 63;

static NAME_PATTERN: OnceLock<Regex> = OnceLock::new();
static SUBDOMAIN_PATTERN: OnceLock<Regex> = OnceLock::new();

fn name_pattern() -> &'static Regex {
    NAME_PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$")
            .expect("label name pattern is valid")
    })
}

fn subdomain_pattern() -> &'static Regex {
    SUBDOMAIN_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("subdomain pattern is valid")
    })
}

/// Errors raised while constructing label sets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// The key is not a valid (optionally prefixed) label name.
    #[error("label key '{key}' is invalid: {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// What the key violated.
        reason: &'static str,
    },

    /// The value is not valid label-value syntax.
    #[error("label value '{value}' for key '{key}' is invalid: {reason}")]
    InvalidValue {
        /// The key the value was supplied for.
        key: String,
        /// The offending value.
        value: String,
        /// What the value violated.
        reason: &'static str,
    },
}

fn validate_name(key: &str, name: &str) -> Result<(), LabelError> {
    if name.is_empty() {
        return Err(LabelError::InvalidKey {
            key: key.to_string(),
            reason: "name must not be empty",
        });
    }
    if name.len() > NAME_MAX_LEN {
        return Err(LabelError::InvalidKey {
            key: key.to_string(),
            reason: "name must be 63 characters or fewer",
        });
    }
    if !name_pattern().is_match(name) {
        return Err(LabelError::InvalidKey {
            key: key.to_string(),
            reason: "name must start and end alphanumeric, with only '-', '_', '.' between",
        });
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<(), LabelError> {
    match key.split_once('/') {
        None => validate_name(key, key),
        Some((prefix, name)) => {
            if name.contains('/') {
                return Err(LabelError::InvalidKey {
                    key: key.to_string(),
                    reason: "key must contain at most one '/'",
                });
            }
            if prefix.is_empty() {
                return Err(LabelError::InvalidKey {
                    key: key.to_string(),
                    reason: "prefix must not be empty",
                });
            }
            if prefix.len() > PREFIX_MAX_LEN {
                return Err(LabelError::InvalidKey {
                    key: key.to_string(),
                    reason: "prefix must be 253 characters or fewer",
                });
            }
            if !subdomain_pattern().is_match(prefix) {
                return Err(LabelError::InvalidKey {
                    key: key.to_string(),
                    reason: "prefix must be a lowercase DNS subdomain",
                });
            }
            validate_name(key, name)
        }
    }
}

fn validate_value(key: &str, value: &str) -> Result<(), LabelError> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > VALUE_MAX_LEN {
        return Err(LabelError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "value must be 63 characters or fewer",
        });
    }
    if !name_pattern().is_match(value) {
        return Err(LabelError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "value must start and end alphanumeric, with only '-', '_', '.' between",
        });
    }
    Ok(())
}

/// An ordered set of key→value label constraints.
///
/// Iteration and the canonical string form are always sorted by key, which is
/// what makes [`Selector::key`] stable.
///
/// # Examples
///
/// ```
/// use scopewatch::labels::LabelSet;
///
/// let labels = LabelSet::try_from_pairs([("run", "api")]).unwrap();
/// assert_eq!(labels.get("run"), Some("api"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    /// Creates an empty label set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a label set from key/value pairs, validating each one.
    ///
    /// # Errors
    /// Returns a [`LabelError`] for the first pair whose key or value is not
    /// valid label syntax.
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self, LabelError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut set = Self::new();
        for (key, value) in pairs {
            set.insert(key, value)?;
        }
        Ok(set)
    }

    /// Inserts one validated label, replacing any previous value for the key.
    ///
    /// # Errors
    /// Returns a [`LabelError`] when the key or value is not valid label
    /// syntax; the set is left unchanged.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<(), LabelError> {
        let key = key.into();
        let value = value.into();
        validate_key(&key)?;
        validate_value(&key, &value)?;
        self.0.insert(key, value);
        Ok(())
    }

    /// Looks up the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of labels in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set holds no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates labels in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Canonical registry key for a selector.
///
/// The only way to derive one is [`Selector::key`], so two keys are equal
/// exactly when the selectors constrain the same labels to the same values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectorKey(String);

impl SelectorKey {
    /// The canonical string form (`key=value` pairs, sorted, comma-joined).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SelectorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An equality-based label selector.
///
/// A selector matches a label set when every constraint key is present with
/// exactly the constrained value. The empty selector matches everything.
///
/// # Examples
///
/// ```
/// use scopewatch::labels::{LabelSet, Selector};
///
/// let selector = Selector::new(LabelSet::try_from_pairs([("run", "api")]).unwrap());
/// let labels = LabelSet::try_from_pairs([("run", "api"), ("tier", "web")]).unwrap();
///
/// assert!(selector.matches(&labels));
/// assert_eq!(selector.key().as_str(), "run=api");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    constraints: LabelSet,
}

impl Selector {
    /// Creates a selector from its constraints.
    #[must_use]
    pub fn new(constraints: LabelSet) -> Self {
        Self { constraints }
    }

    /// The selector that matches every label set.
    #[must_use]
    pub fn everything() -> Self {
        Self::new(LabelSet::new())
    }

    /// The constraints this selector requires.
    #[must_use]
    pub fn constraints(&self) -> &LabelSet {
        &self.constraints
    }

    /// Pure membership predicate: all constraints present and equal.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.constraints
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    /// Derives the canonical registry key for this selector.
    #[must_use]
    pub fn key(&self) -> SelectorKey {
        SelectorKey(self.constraints.to_string())
    }
}
