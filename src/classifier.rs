//! Decides which outbound calls are subject to regulation.
//!
//! Matching is conservative: a target that matches no rule is unregulated and passes through
//! untouched. Rules come in two shapes:
//!
//! - **Host**: exact hostname, ASCII case-insensitive, port ignored.
//! - **Path prefix**: matches whole path segments, so `/hooks` covers `/hooks` and
//!   `/hooks/catch/1` but not `/hooksmith`.
//!
//! A target is regulated when it matches *any* rule.

use crate::config::ConfigError;
use url::Url;

/// Where a call is headed. Only host and path matter for classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    host: String,
    path: String,
}

impl Target {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.is_empty() { "/".to_string() } else { path };
        Self { host: host.into(), path }
    }

    /// Parse an absolute URL. Returns `None` for relative or host-less URLs.
    pub fn from_url(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        let host = url.host_str()?;
        Some(Self::new(host, url.path()))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rule {
    Host(String),
    PathPrefix(String),
}

impl Rule {
    fn matches(&self, target: &Target) -> bool {
        match self {
            Rule::Host(host) => normalize_host(&target.host) == *host,
            Rule::PathPrefix(prefix) => path_has_prefix(&target.path, prefix),
        }
    }
}

/// Rule set consulted by the admission scheduler. Pure: no I/O, no state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// A classifier that regulates nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// Regulate every call to `host`.
    pub fn with_host(mut self, host: &str) -> Result<Self, ConfigError> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Err(ConfigError::EmptyRule("host"));
        }
        self.rules.push(Rule::Host(host));
        Ok(self)
    }

    /// Regulate every call whose path starts with `prefix` (segment-aligned).
    pub fn with_path_prefix(mut self, prefix: &str) -> Result<Self, ConfigError> {
        let trimmed = prefix.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConfigError::EmptyRule("path prefix"));
        }
        let normalized =
            if trimmed.starts_with('/') { trimmed.to_string() } else { format!("/{trimmed}") };
        self.rules.push(Rule::PathPrefix(normalized));
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether calls to `target` go through the token bucket.
    pub fn is_regulated(&self, target: &Target) -> bool {
        self.rules.iter().any(|rule| rule.matches(target))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim();
    // Strip a port, leaving bracketed IPv6 literals intact.
    let host = match host.rsplit_once(':') {
        Some((name, port))
            if !name.is_empty()
                && (!name.contains(':') || name.ends_with(']'))
                && port.chars().all(|c| c.is_ascii_digit()) =>
        {
            name
        }
        _ => host,
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}

fn path_has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
