//! Selection of which request paths go through admission control.

/// A single configured path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    /// Matches one path exactly
    Exact(String),
    /// Matches a path and everything below it (`/restore/*`)
    Prefix(String),
}

impl PathPattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix("/*") {
            Some(prefix) => PathPattern::Prefix(prefix.to_string()),
            None => PathPattern::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Exact(p) => path == p,
            PathPattern::Prefix(p) => {
                path == p || path.strip_prefix(p.as_str()).is_some_and(|rest| rest.starts_with('/'))
            }
        }
    }
}

/// Decides whether a request path is subject to admission checks.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    patterns: Vec<PathPattern>,
    /// Paths that are never checked, even when a pattern covers them
    exempt: Vec<String>,
}

impl PathMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| PathPattern::parse(p.as_ref()))
                .collect(),
            exempt: Vec::new(),
        }
    }

    /// Never check `path`. Used for the denial redirect target so it cannot loop.
    pub fn exempting(mut self, path: impl Into<String>) -> Self {
        self.exempt.push(path.into());
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        if self.exempt.iter().any(|e| e == path) {
            return false;
        }
        self.patterns.iter().any(|p| p.matches(path))
    }
}
