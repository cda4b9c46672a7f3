// ABOUTME: Classifies every request path into exactly one traffic class, API or browser.
// ABOUTME: The classifier is built once at startup and never changes afterwards.

use std::fmt;

/// Default namespace reserved for machine-to-machine traffic.
pub const DEFAULT_API_PREFIX: &str = "/api";

/// The traffic class a request belongs to. Each class has its own policy chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Api,
    Browser,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Api => write!(f, "api"),
            Route::Browser => write!(f, "browser"),
        }
    }
}

/// Pure path-prefix classifier.
///
/// A path equal to the prefix, or starting with `<prefix>/`, is [`Route::Api`].
/// Everything else is [`Route::Browser`]. A classifier without a prefix (no
/// API handler configured) sends all traffic to the browser class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    api_prefix: Option<String>,
}

impl Classifier {
    /// Create a classifier for the given API prefix. A trailing slash is ignored.
    pub fn new(api_prefix: impl Into<String>) -> Self {
        let prefix = api_prefix.into();
        let trimmed = prefix.trim_end_matches('/').to_string();
        Self {
            api_prefix: Some(trimmed),
        }
    }

    /// Classifier that never produces [`Route::Api`].
    pub fn browser_only() -> Self {
        Self { api_prefix: None }
    }

    pub fn api_prefix(&self) -> Option<&str> {
        self.api_prefix.as_deref()
    }

    pub fn classify(&self, path: &str) -> Route {
        let Some(prefix) = self.api_prefix.as_deref() else {
            return Route::Browser;
        };

        match path.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Route::Api,
            _ => Route::Browser,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_API_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_prefix_and_subpaths_are_api() {
        let c = Classifier::default();
        assert_eq!(c.classify("/api"), Route::Api);
        assert_eq!(c.classify("/api/"), Route::Api);
        assert_eq!(c.classify("/api/v1/users"), Route::Api);
    }

    #[test]
    fn lookalike_prefixes_are_browser() {
        let c = Classifier::default();
        assert_eq!(c.classify("/apiary"), Route::Browser);
        assert_eq!(c.classify("/"), Route::Browser);
        assert_eq!(c.classify("/web/api"), Route::Browser);
    }

    #[test]
    fn trailing_slash_in_prefix_is_ignored() {
        let c = Classifier::new("/machine/");
        assert_eq!(c.api_prefix(), Some("/machine"));
        assert_eq!(c.classify("/machine/jobs"), Route::Api);
        assert_eq!(c.classify("/machines"), Route::Browser);
    }

    #[test]
    fn browser_only_never_classifies_api() {
        let c = Classifier::browser_only();
        assert_eq!(c.classify("/api/v1"), Route::Browser);
        assert_eq!(c.classify("/"), Route::Browser);
    }

    #[test]
    fn route_displays_lowercase() {
        assert_eq!(Route::Api.to_string(), "api");
        assert_eq!(Route::Browser.to_string(), "browser");
    }
}
