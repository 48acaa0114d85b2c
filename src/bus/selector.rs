//! # Selectors
//!
//! The pure-lookup collaborator the bus consults on every `notify`: a
//! selector answers whether a registration is interested in a routing key.
//! Three stock implementations cover the common cases — exact key, simple
//! wildcard (leading or trailing `*`), and an arbitrary predicate.

use std::fmt;

/// Predicate matching routing keys to registered consumers. Pure lookup, no
/// side effects.
pub trait Selector: Send + Sync {
    fn matches(&self, key: &str) -> bool;

    /// Human-readable form for log fields and stats.
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.describe())
    }
}

/// Exact-match selector.
pub struct KeySelector {
    key: String,
}

impl KeySelector {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl Selector for KeySelector {
    fn matches(&self, key: &str) -> bool {
        self.key == key
    }

    fn describe(&self) -> String {
        self.key.clone()
    }
}

/// Simple wildcard selector: `task.*` matches by prefix, `*.completed` by
/// suffix, anything else exactly.
pub struct WildcardSelector {
    pattern: String,
}

impl WildcardSelector {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl Selector for WildcardSelector {
    fn matches(&self, key: &str) -> bool {
        if let Some(prefix) = self.pattern.strip_suffix('*') {
            key.starts_with(prefix)
        } else if let Some(suffix) = self.pattern.strip_prefix('*') {
            key.ends_with(suffix)
        } else {
            key == self.pattern
        }
    }

    fn describe(&self) -> String {
        self.pattern.clone()
    }
}

/// Selector backed by an arbitrary predicate.
pub struct PredicateSelector<F> {
    label: String,
    predicate: F,
}

impl<F> PredicateSelector<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    pub fn new(label: impl Into<String>, predicate: F) -> Self {
        Self {
            label: label.into(),
            predicate,
        }
    }
}

impl<F> Selector for PredicateSelector<F>
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, key: &str) -> bool {
        (self.predicate)(key)
    }

    fn describe(&self) -> String {
        format!("predicate:{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_selector_matches_only_its_key() {
        let selector = KeySelector::new("task.completed");
        assert!(selector.matches("task.completed"));
        assert!(!selector.matches("task.failed"));
        assert!(!selector.matches("task.completed.late"));
    }

    #[test]
    fn wildcard_prefix_and_suffix() {
        let prefix = WildcardSelector::new("task.*");
        assert!(prefix.matches("task.started"));
        assert!(prefix.matches("task.completed"));
        assert!(!prefix.matches("step.started"));

        let suffix = WildcardSelector::new("*.failed");
        assert!(suffix.matches("task.failed"));
        assert!(suffix.matches("step.failed"));
        assert!(!suffix.matches("task.completed"));

        let exact = WildcardSelector::new("plain");
        assert!(exact.matches("plain"));
        assert!(!exact.matches("plainer"));
    }

    #[test]
    fn predicate_selector_delegates() {
        let selector = PredicateSelector::new("even-length", |key: &str| key.len() % 2 == 0);
        assert!(selector.matches("ab"));
        assert!(!selector.matches("abc"));
        assert_eq!(selector.describe(), "predicate:even-length");
    }
}
