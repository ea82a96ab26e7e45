//! Hostname glob matching.
//!
//! Allowlist entries are glob patterns over hostnames, with `.` as the
//! hierarchy separator. Every pattern is compiled once into a
//! [`globset::GlobSet`]; after that the matcher is immutable and can be
//! shared freely between connection tasks.
//!
//! # Pattern Syntax
//!
//! - `*` matches any run of characters, including `.`. `*.example.com`
//!   matches `api.example.com` and `a.b.example.com` but NOT `example.com`.
//!   `**` is accepted and means the same thing.
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` match one character from the class; `[!abc]` matches
//!   one character outside the class. A leading `]` is a class member.
//! - `{api,www}.example.com` matches either alternative (no nesting)
//! - `\x` matches `x` literally
//!
//! Matching ignores ASCII case.
//!
//! # Example
//!
//! ```
//! use hostgate::proxy::matcher::HostMatcher;
//!
//! let matcher = HostMatcher::compile(["*.example.com", "example.org"]).unwrap();
//! assert!(matcher.matches("api.example.com"));
//! assert!(!matcher.matches("example.com"));
//! assert!(matcher.matches("EXAMPLE.org"));
//! ```

use globset::{GlobBuilder, GlobMatcher, GlobSet, GlobSetBuilder};
use thiserror::Error;

/// A pattern that is not a valid hostname glob.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The pattern is the empty string.
    #[error("empty hostname pattern")]
    Empty,

    /// The glob engine rejected the pattern.
    #[error(transparent)]
    Invalid(#[from] globset::Error),
}

/// A single compiled allowlist entry.
#[derive(Debug, Clone)]
pub struct HostPattern {
    source: String,
    glob: globset::Glob,
    matcher: GlobMatcher,
}

impl HostPattern {
    /// Compile one glob pattern.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        if pattern.is_empty() {
            return Err(PatternError::Empty);
        }

        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .backslash_escape(true)
            .build()?;

        Ok(Self {
            source: pattern.to_string(),
            matcher: glob.compile_matcher(),
            glob,
        })
    }

    /// The pattern as the operator wrote it.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `hostname` matches this pattern.
    pub fn matches(&self, hostname: &str) -> bool {
        self.matcher.is_match(hostname)
    }
}

/// The compiled allowlist.
///
/// Answers whether a hostname matches any of the configured patterns.
/// An empty matcher matches nothing.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    glob_set: GlobSet,
    patterns: Vec<HostPattern>,
}

impl HostMatcher {
    /// Compile a list of glob patterns.
    ///
    /// Fails on the first pattern that is not a valid glob.
    pub fn compile<I, S>(patterns: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| HostPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            builder.add(pattern.glob.clone());
        }
        let glob_set = builder.build()?;

        Ok(Self { glob_set, patterns })
    }

    /// A matcher that denies everything.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            glob_set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    /// Whether `hostname` matches any pattern.
    pub fn matches(&self, hostname: &str) -> bool {
        self.glob_set.is_match(hostname)
    }

    /// The first pattern that matches `hostname`, if any.
    pub fn matching_pattern(&self, hostname: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| p.matches(hostname))
            .map(HostPattern::as_str)
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the allowlist is empty.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// The patterns in configuration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(HostPattern::as_str)
    }
}

impl Default for HostMatcher {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globset::ErrorKind;

    fn matcher(patterns: &[&str]) -> HostMatcher {
        HostMatcher::compile(patterns).unwrap()
    }

    fn error_kind(pattern: &str) -> ErrorKind {
        match HostPattern::new(pattern) {
            Err(PatternError::Invalid(e)) => e.kind().clone(),
            other => panic!("expected a glob error for {pattern:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_pattern() {
        let m = matcher(&["api.example.com"]);
        assert!(m.matches("api.example.com"));
        assert!(!m.matches("www.example.com"));
        assert!(!m.matches("api.example.com.evil.net"));
        assert!(!m.matches("xapi.example.com"));
    }

    #[test]
    fn test_dot_is_literal() {
        let m = matcher(&["example.com"]);
        assert!(!m.matches("exampleXcom"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        let m = matcher(&["*.example.com"]);
        assert!(m.matches("sub.example.com"));
        assert!(m.matches("deep.sub.example.com"));
        assert!(!m.matches("example.com"));
        assert!(!m.matches("fakeexample.com"));
        assert!(!m.matches("sub.example.com.evil.net"));
    }

    #[test]
    fn test_star_matches_everything() {
        let m = matcher(&["*"]);
        assert!(m.matches("example.com"));
        assert!(m.matches("localhost"));
        assert!(m.matches("a.b.c.d"));
        assert!(m.matches("*"));
    }

    #[test]
    fn test_double_star_is_synonym() {
        let m = matcher(&["**.example.com"]);
        assert!(m.matches("a.b.example.com"));
        assert!(!m.matches("example.com"));

        let m = matcher(&["**"]);
        assert!(m.matches("a.b.example.com"));
    }

    #[test]
    fn test_wildcard_inside_label() {
        let m = matcher(&["api-*.example.com"]);
        assert!(m.matches("api-eu.example.com"));
        assert!(!m.matches("web-eu.example.com"));
    }

    #[test]
    fn test_question_mark_single_char() {
        let m = matcher(&["node?.example.com"]);
        assert!(m.matches("node1.example.com"));
        assert!(!m.matches("node12.example.com"));
        assert!(!m.matches("node.example.com"));
    }

    #[test]
    fn test_character_class() {
        let m = matcher(&["db[0-9].example.com"]);
        assert!(m.matches("db3.example.com"));
        assert!(!m.matches("dbx.example.com"));

        let m = matcher(&["[ab]pi.example.com"]);
        assert!(m.matches("api.example.com"));
        assert!(m.matches("bpi.example.com"));
        assert!(!m.matches("cpi.example.com"));
    }

    #[test]
    fn test_negated_class() {
        let m = matcher(&["a[!x]b"]);
        assert!(m.matches("ayb"));
        assert!(!m.matches("axb"));
    }

    #[test]
    fn test_class_leading_bracket_is_member() {
        let m = matcher(&["[]a]"]);
        assert!(m.matches("]"));
        assert!(m.matches("a"));
        assert!(!m.matches("b"));
    }

    #[test]
    fn test_class_trailing_dash_is_literal() {
        let m = matcher(&["a[x-]b"]);
        assert!(m.matches("a-b"));
        assert!(m.matches("axb"));
        assert!(!m.matches("ayb"));
    }

    #[test]
    fn test_alternation() {
        let m = matcher(&["{api,www}.example.com"]);
        assert!(m.matches("api.example.com"));
        assert!(m.matches("www.example.com"));
        assert!(!m.matches("ftp.example.com"));
    }

    #[test]
    fn test_alternation_with_wildcards() {
        let m = matcher(&["{*.cdn,static?}.example.com"]);
        assert!(m.matches("eu.cdn.example.com"));
        assert!(m.matches("static1.example.com"));
        assert!(!m.matches("static12.example.com"));
        assert!(!m.matches("cdn.example.com"));
    }

    #[test]
    fn test_comma_outside_alternation_is_literal() {
        let m = matcher(&["a,b"]);
        assert!(m.matches("a,b"));
        assert!(!m.matches("a"));
    }

    #[test]
    fn test_escape() {
        let m = matcher(&["\\*.example.com"]);
        assert!(m.matches("*.example.com"));
        assert!(!m.matches("api.example.com"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let m = matcher(&["a+b(c)|d^$"]);
        assert!(m.matches("a+b(c)|d^$"));
        assert!(!m.matches("aab"));
    }

    #[test]
    fn test_case_insensitive() {
        let m = matcher(&["*.Example.COM"]);
        assert!(m.matches("API.example.com"));
        assert!(m.matches("api.EXAMPLE.com"));
    }

    #[test]
    fn test_empty_matcher_matches_nothing() {
        let m = HostMatcher::empty();
        assert!(m.is_empty());
        assert!(!m.matches("example.com"));
        assert!(!m.matches("*"));
        assert!(!m.matches(""));

        let m = HostMatcher::compile(Vec::<String>::new()).unwrap();
        assert!(!m.matches("example.com"));
        assert!(!HostMatcher::default().matches("example.com"));
    }

    #[test]
    fn test_any_pattern_matches() {
        let m = matcher(&["a.example.com", "b.example.com", "*.example.org"]);
        assert!(m.matches("a.example.com"));
        assert!(m.matches("b.example.com"));
        assert!(m.matches("x.example.org"));
        assert!(!m.matches("c.example.com"));
    }

    #[test]
    fn test_pattern_order_does_not_change_result() {
        let patterns = ["api.example.com", "*.example.org", "{a,b}.test"];
        let hosts = [
            "api.example.com",
            "x.example.org",
            "a.test",
            "c.test",
            "example.org",
        ];

        let forward = matcher(&patterns);
        let mut reversed_patterns = patterns;
        reversed_patterns.reverse();
        let reversed = matcher(&reversed_patterns);

        for host in hosts {
            assert_eq!(forward.matches(host), reversed.matches(host), "{host}");
        }
    }

    #[test]
    fn test_matching_pattern_reports_first_match() {
        let m = matcher(&["*.example.com", "api.example.com"]);
        assert_eq!(m.matching_pattern("api.example.com"), Some("*.example.com"));
        assert_eq!(m.matching_pattern("example.net"), None);
    }

    #[test]
    fn test_patterns_preserve_order() {
        let m = matcher(&["b", "a"]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.patterns().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(HostPattern::new(""), Err(PatternError::Empty)));
        assert_eq!(error_kind("db[0-9.example.com"), ErrorKind::UnclosedClass);
        assert_eq!(error_kind("[z-a].com"), ErrorKind::InvalidRange('z', 'a'));
        assert_eq!(
            error_kind("{api,www.example.com"),
            ErrorKind::UnclosedAlternates
        );
        assert_eq!(error_kind("{a,{b,c}}.com"), ErrorKind::NestedAlternates);
        assert_eq!(error_kind("example.com\\"), ErrorKind::DanglingEscape);
    }

    #[test]
    fn test_compile_fails_on_any_invalid_pattern() {
        let result = HostMatcher::compile(["ok.example.com", "bad[.example.com"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_error_message_names_pattern() {
        let err = HostPattern::new("bad[").unwrap_err();
        assert!(err.to_string().contains("bad["));
    }
}
