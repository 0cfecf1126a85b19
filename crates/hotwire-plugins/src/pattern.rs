//! Pattern compilation and caching
//!
//! Handler patterns are anchored at the start of the text and compiled with
//! `.` matching newlines. Compiled matchers are cached by raw pattern text in
//! a bounded cache that is cleared wholesale once it grows past its bound.

use parking_lot::Mutex;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cache bound
pub const DEFAULT_CAPACITY: usize = 200;

/// Prepend `^` unless the pattern is already anchored.
pub fn anchor(pattern: &str) -> Cow<'_, str> {
    if pattern.starts_with('^') {
        Cow::Borrowed(pattern)
    } else {
        Cow::Owned(format!("^{pattern}"))
    }
}

/// Capture groups of a match, without the whole-match group.
pub fn capture_groups(captures: &regex::Captures<'_>) -> Vec<Option<String>> {
    captures
        .iter()
        .skip(1)
        .map(|group| group.map(|m| m.as_str().to_string()))
        .collect()
}

/// Bounded cache of compiled matchers
#[derive(Debug)]
pub struct PatternCache {
    capacity: usize,
    entries: Mutex<HashMap<String, Arc<Regex>>>,
}

impl PatternCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Compile `pattern`, reporting invalid syntax and returning `None`.
    pub fn compile(&self, pattern: &str) -> Option<Arc<Regex>> {
        match self.try_compile(pattern) {
            Ok(matcher) => Some(matcher),
            Err(e) => {
                warn!(pattern, "invalid handler pattern: {}", e);
                None
            }
        }
    }

    /// Compile `pattern`, returning the syntax error on failure.
    pub fn try_compile(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(hit) = self.entries.lock().get(pattern) {
            return Ok(hit.clone());
        }

        let matcher = Arc::new(
            RegexBuilder::new(&anchor(pattern))
                .dot_matches_new_line(true)
                .build()?,
        );

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            debug!(size = entries.len(), "pattern cache full, clearing");
            entries.clear();
        }
        entries.insert(pattern.to_string(), matcher.clone());
        Ok(matcher)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PatternCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_unanchored_patterns() {
        assert_eq!(anchor("ping$"), "^ping$");
        assert_eq!(anchor("^ping$"), "^ping$");
    }

    #[test]
    fn compiled_patterns_match_from_the_start_only() {
        let cache = PatternCache::default();
        let matcher = cache.compile("ping").unwrap();
        assert!(matcher.is_match("ping me"));
        assert!(!matcher.is_match("say ping"));
    }

    #[test]
    fn dot_matches_newline() {
        let cache = PatternCache::default();
        let matcher = cache.compile("echo (.+)$").unwrap();
        let caps = matcher.captures("echo line one\nline two").unwrap();
        assert_eq!(capture_groups(&caps), vec![Some("line one\nline two".to_string())]);
    }

    #[test]
    fn unmatched_optional_groups_are_none() {
        let cache = PatternCache::default();
        let matcher = cache.compile(r"roll(?: (\d+))?$").unwrap();
        let caps = matcher.captures("roll").unwrap();
        assert_eq!(capture_groups(&caps), vec![None]);
        let caps = matcher.captures("roll 20").unwrap();
        assert_eq!(capture_groups(&caps), vec![Some("20".to_string())]);
    }

    #[test]
    fn invalid_pattern_returns_none() {
        let cache = PatternCache::default();
        assert!(cache.compile("(unclosed").is_none());
        assert!(cache.try_compile("(unclosed").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn cache_hits_share_the_matcher() {
        let cache = PatternCache::default();
        let a = cache.compile("^hello").unwrap();
        let b = cache.compile("^hello").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_is_cleared_past_its_bound() {
        let cache = PatternCache::new(3);
        for i in 0..3 {
            cache.compile(&format!("^p{i}$")).unwrap();
        }
        assert_eq!(cache.len(), 3);
        cache.compile("^p3$").unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
