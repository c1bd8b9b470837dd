//! Which request paths the guard protects.

use l402::caveat;
use regex::Regex;

/// A set of `*` globs. A path is protected if any glob matches it.
///
/// Globs are compiled once, at construction.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    patterns: Vec<String>,
    compiled: Vec<Regex>,
}

impl RoutePolicy {
    /// Compiles `patterns`.
    ///
    /// # Errors
    ///
    /// Returns [`l402::Error::InvalidConfiguration`] for an empty pattern or
    /// one that does not compile.
    pub fn new<I, S>(patterns: I) -> Result<Self, l402::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = Self::default();
        for pattern in patterns {
            policy.push(pattern.into())?;
        }
        Ok(policy)
    }

    fn push(&mut self, pattern: String) -> Result<(), l402::Error> {
        if pattern.is_empty() {
            return Err(l402::Error::config("route pattern must not be empty"));
        }
        let compiled = caveat::glob_regex(&pattern)
            .map_err(|e| l402::Error::config(format!("route pattern {pattern:?}: {e}")))?;
        self.patterns.push(pattern);
        self.compiled.push(compiled);
        Ok(())
    }

    /// The patterns as configured.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `true` if no pattern is configured, in which case nothing is protected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// `true` if `path` matches any pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.compiled.iter().any(|re| re.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_protection() {
        let policy = RoutePolicy::new(["/protected/*", "/exact"]).unwrap();
        assert!(policy.matches("/protected/"));
        assert!(policy.matches("/protected/a/b"));
        assert!(policy.matches("/exact"));
        assert!(!policy.matches("/exact/sub"));
        assert!(!policy.matches("/public"));
        assert!(!policy.matches("/protected"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let policy = RoutePolicy::new(["/v1.0/items"]).unwrap();
        assert!(policy.matches("/v1.0/items"));
        assert!(!policy.matches("/v1x0/items"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(RoutePolicy::new([""]).is_err());
        assert!(RoutePolicy::new(Vec::<String>::new()).unwrap().is_empty());
    }
}
