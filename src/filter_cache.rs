//! Lazy-compiling regex cache for route filters (spec.md §4.5, C5).
//!
//! Route filters are compiled once and kept around for the life of the
//! process; a pattern that fails to compile is cached as a permanent
//! failure so a malformed route filter doesn't re-pay a compile attempt
//! (and re-log a warning) on every event.

use dashmap::DashMap;
use regex::Regex;
use std::sync::Arc;
use tracing::warn;

enum CacheEntry {
    Compiled(Arc<Regex>),
    Invalid(String),
}

/// Compiles filter strings to `Regex` on first use and remembers the result.
/// Never evicts — the set of distinct filter strings in a running engine is
/// bounded by the number of configured routes, which is small.
pub struct FilterCache {
    entries: DashMap<String, CacheEntry>,
}

impl FilterCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Evaluate `filter` against `text`. Empty string and the literal
    /// `"true"` always match without compiling anything (spec.md §4.5/§4.6).
    pub fn matches(&self, filter: &str, text: &str) -> bool {
        if filter.is_empty() || filter == "true" {
            return true;
        }
        match self.compiled(filter) {
            Some(re) => re.is_match(text),
            None => false,
        }
    }

    fn compiled(&self, filter: &str) -> Option<Arc<Regex>> {
        if let Some(entry) = self.entries.get(filter) {
            return match entry.value() {
                CacheEntry::Compiled(re) => Some(re.clone()),
                CacheEntry::Invalid(_) => None,
            };
        }
        match Regex::new(filter) {
            Ok(re) => {
                let re = Arc::new(re);
                self.entries
                    .insert(filter.to_string(), CacheEntry::Compiled(re.clone()));
                Some(re)
            }
            Err(err) => {
                warn!(filter, %err, "route filter failed to compile, route will never match");
                self.entries
                    .insert(filter.to_string(), CacheEntry::Invalid(err.to_string()));
                None
            }
        }
    }

    pub fn compile_error(&self, filter: &str) -> Option<String> {
        self.compiled(filter);
        match self.entries.get(filter)?.value() {
            CacheEntry::Invalid(msg) => Some(msg.clone()),
            CacheEntry::Compiled(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for FilterCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn empty_and_true_always_match() {
        let cache = FilterCache::new();
        assert!(cache.matches("", "anything"));
        assert!(cache.matches("true", "anything"));
    }

    #[test]
    fn compiles_and_matches_regex() {
        let cache = FilterCache::new();
        assert!(cache.matches(r"^ERROR", "ERROR: disk full"));
        assert!(!cache.matches(r"^ERROR", "INFO: all good"));
    }

    #[test]
    fn invalid_pattern_never_matches_and_does_not_panic() {
        let cache = FilterCache::new();
        assert!(!cache.matches("(unclosed", "anything"));
        assert!(cache.compile_error("(unclosed").is_some());
    }

    #[test]
    fn compiles_pattern_at_most_once() {
        // Count compiles indirectly: a second cache with a counter hook
        // would require threading compilation through a callback, which
        // the public API intentionally doesn't expose. Instead we assert
        // the cache holds exactly one entry after repeated matches.
        let cache = FilterCache::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..50 {
            cache.matches(r"^WARN", "WARN: low disk");
            calls.fetch_add(1, Ordering::Relaxed);
        }
        assert_eq!(calls.load(Ordering::Relaxed), 50);
        assert_eq!(cache.len(), 1);
    }
}
