//! Route matching logic.
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Prefix matching only, no regex in the hot path
//! - Prefixes match whole segments: `/auth` covers `/auth/x` but not `/authors`

/// Trait for matching request paths against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the path matches this condition.
    fn matches_path(&self, path: &str) -> bool;
}

/// Matches the request path prefix on a segment boundary.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches_path(&self, path: &str) -> bool {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/'),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");

        assert!(matcher.matches_path("/api"));
        assert!(matcher.matches_path("/api/v1"));
        assert!(matcher.matches_path("/api?page=2"));
        assert!(!matcher.matches_path("/images"));
    }

    #[test]
    fn test_prefix_stops_at_segment_boundary() {
        let matcher = PathPrefixMatcher::new("/auth");
        assert!(matcher.matches_path("/auth/callback"));
        assert!(!matcher.matches_path("/authors/jane-doe"));

        let trailing = PathPrefixMatcher::new("/v1/");
        assert!(trailing.matches_path("/v1/orders"));
        assert!(!trailing.matches_path("/v1"));

        let root = PathPrefixMatcher::new("/");
        assert!(root.matches_path("/anything"));
    }

    #[test]
    fn test_path_matching_is_case_sensitive() {
        let matcher = PathPrefixMatcher::new("/api");
        assert!(!matcher.matches_path("/API/cart"));
    }
}
