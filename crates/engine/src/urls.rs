//! URL normalization relative to the registration scope.
//!
//! Cache keys, manifest URLs and hash-table entries are all compared in
//! normalized form: same-origin URLs become origin-relative (`/a.js?v=1`),
//! anything else stays absolute. Fragments never take part.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

pub struct UrlResolver {
    scope: Url,
    bust_parameter: String,
    bust_counter: AtomicU64,
}
impl UrlResolver {
    pub fn new(scope: &str, bust_parameter: impl Into<String>) -> Result<Self> {
        let scope = Url::parse(scope).or_raise(|| ErrorKind::Boot)?;
        Ok(Self { scope, bust_parameter: bust_parameter.into(), bust_counter: AtomicU64::new(0) })
    }

    pub fn scope(&self) -> &str {
        self.scope.as_str()
    }

    fn parse(&self, url: &str) -> Option<Url> {
        let mut parsed = self.scope.join(url).ok()?;
        parsed.set_fragment(None);
        Some(parsed)
    }

    /// Origin-relative for same-origin URLs, absolute otherwise.
    ///
    /// ```
    /// use stowaway_engine::UrlResolver;
    ///
    /// let urls = UrlResolver::new("http://localhost/app/", "bust").unwrap();
    /// assert_eq!(urls.normalize("http://localhost/a.js?v=1#top"), "/a.js?v=1");
    /// assert_eq!(urls.normalize("b.js"), "/app/b.js");
    /// assert_eq!(urls.normalize("https://cdn.example/c.js"), "https://cdn.example/c.js");
    /// ```
    pub fn normalize(&self, url: &str) -> String {
        let Some(parsed) = self.parse(url) else {
            return url.to_string();
        };
        if parsed.origin() != self.scope.origin() {
            return parsed.to_string();
        }
        match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        }
    }

    /// Absolute form, suitable for handing to the network.
    pub fn absolute(&self, url: &str) -> String {
        self.parse(url).map(|parsed| parsed.to_string()).unwrap_or_else(|| url.to_string())
    }

    /// Path used for navigation rules: relative to the scope, without query
    /// or fragment. URLs outside the scope keep their absolute form.
    ///
    /// ```
    /// use stowaway_engine::UrlResolver;
    ///
    /// let urls = UrlResolver::new("http://localhost/app/", "bust").unwrap();
    /// assert_eq!(urls.navigation_path("http://localhost/app/users/1?tab=2"), "/users/1");
    /// assert_eq!(urls.navigation_path("http://localhost/other"), "http://localhost/other");
    /// ```
    pub fn navigation_path(&self, url: &str) -> String {
        let Some(mut parsed) = self.parse(url) else {
            return url.to_string();
        };
        parsed.set_query(None);
        let scope_path = self.scope.path().trim_end_matches('/');
        if parsed.origin() == self.scope.origin()
            && let Some(rest) = parsed.path().strip_prefix(scope_path)
            && (rest.is_empty() || rest.starts_with('/'))
        {
            return if rest.is_empty() { "/".to_string() } else { rest.to_string() };
        }
        parsed.to_string()
    }

    /// Absolute URL with a unique cache-busting query parameter appended.
    pub fn cache_bust(&self, url: &str, now: u64) -> String {
        let Some(mut parsed) = self.parse(url) else {
            return url.to_string();
        };
        let nonce = self.bust_counter.fetch_add(1, Ordering::Relaxed);
        parsed.query_pairs_mut().append_pair(&self.bust_parameter, &format!("{now}.{nonce}"));
        parsed.to_string()
    }

    /// Whether `url`'s query string contains `name` (with or without a value).
    pub fn has_query_flag(&self, url: &str, name: &str) -> bool {
        self.parse(url).is_some_and(|parsed| parsed.query_pairs().any(|(key, _)| key.eq_ignore_ascii_case(name)))
    }

    /// Plain-HTTP request under an HTTPS scope.
    pub fn is_mixed_content(&self, url: &str) -> bool {
        self.scope.scheme() == "https" && self.parse(url).is_some_and(|parsed| parsed.scheme() == "http")
    }
}
