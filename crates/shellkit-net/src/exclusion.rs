//! Hostname patterns for origins that must never be intercepted.

use tracing::trace;
use url::Url;

/// How a [`HostPattern`] compares against a hostname.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMatch {
    /// Whole hostname equality.
    Exact,
    /// The hostname is the domain or one of its subdomains.
    Suffix,
    /// The hostname contains the pattern anywhere.
    Contains,
}

/// A single hostname predicate. Patterns are compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPattern {
    pub kind: HostMatch,
    pub pattern: String,
}

impl HostPattern {
    /// Create an exact host pattern.
    pub fn exact(host: &str) -> Self {
        Self::with_kind(HostMatch::Exact, host)
    }

    /// Create a domain suffix pattern (`google.com` matches `accounts.google.com`).
    pub fn suffix(domain: &str) -> Self {
        Self::with_kind(HostMatch::Suffix, domain.trim_start_matches('.'))
    }

    /// Create a substring pattern.
    pub fn contains(substring: &str) -> Self {
        Self::with_kind(HostMatch::Contains, substring)
    }

    fn with_kind(kind: HostMatch, pattern: &str) -> Self {
        Self {
            kind,
            pattern: pattern.to_ascii_lowercase(),
        }
    }

    /// Check a bare hostname.
    pub fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        match self.kind {
            HostMatch::Exact => host == self.pattern,
            HostMatch::Suffix => {
                host == self.pattern
                    || host
                        .strip_suffix(self.pattern.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }
            HostMatch::Contains => host.contains(&self.pattern),
        }
    }

    /// Check the host of a URL. URLs without a host never match.
    pub fn matches(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|h| self.matches_host(h))
    }
}

/// Set of hosts whose requests pass through untouched.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<HostPattern>,
}

impl ExclusionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set of substring patterns, the format used in configuration.
    pub fn from_substrings<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().to_string())
            .filter(|h| !h.is_empty())
            .map(|h| HostPattern::contains(&h))
            .collect();
        Self { patterns }
    }

    /// Add a pattern.
    pub fn add(&mut self, pattern: HostPattern) {
        self.patterns.push(pattern);
    }

    /// Whether requests to this URL must bypass interception.
    pub fn is_excluded(&self, url: &Url) -> bool {
        let hit = self.patterns.iter().find(|p| p.matches(url));
        if let Some(pattern) = hit {
            trace!(url = %url, pattern = %pattern.pattern, "Excluded host");
        }
        hit.is_some()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostPattern> {
        self.patterns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_host_pattern_exact() {
        let pattern = HostPattern::exact("script.google.com");
        assert!(pattern.matches(&url("https://script.google.com/macros/s/abc/exec")));
        assert!(!pattern.matches(&url("https://google.com/")));
    }

    #[test]
    fn test_host_pattern_suffix_respects_label_boundary() {
        let pattern = HostPattern::suffix(".google.com");
        assert!(pattern.matches(&url("https://google.com/")));
        assert!(pattern.matches(&url("https://accounts.google.com/o/oauth2")));
        assert!(!pattern.matches(&url("https://notgoogle.com/")));
    }

    #[test]
    fn test_host_pattern_contains_is_case_insensitive() {
        let pattern = HostPattern::contains("GoogleApis.com");
        assert!(pattern.matches(&url("https://sheets.googleapis.com/v4")));
    }

    #[test]
    fn test_url_without_host_never_matches() {
        let pattern = HostPattern::contains("");
        assert!(!pattern.matches(&url("data:text/plain,hi")));
    }

    #[test]
    fn test_exclusion_set_from_substrings() {
        let set = ExclusionSet::from_substrings(["script.google.com", " ", "googleapis.com"]);
        assert_eq!(set.len(), 2);
        assert!(set.is_excluded(&url("https://script.google.com/macros/s/x/exec")));
        assert!(set.is_excluded(&url("https://www.googleapis.com/oauth2/v3/userinfo")));
        assert!(!set.is_excluded(&url("https://attendance.example.org/app.js")));
    }

    #[test]
    fn test_exclusion_set_mixed_patterns() {
        let mut set = ExclusionSet::new();
        assert!(set.is_empty());
        set.add(HostPattern::exact("api.example.org"));
        set.add(HostPattern::suffix("login.example.com"));

        assert!(set.is_excluded(&url("https://api.example.org/v1")));
        assert!(set.is_excluded(&url("https://eu.login.example.com/")));
        assert!(!set.is_excluded(&url("https://www.example.org/")));
        assert_eq!(set.iter().count(), 2);
    }
}
