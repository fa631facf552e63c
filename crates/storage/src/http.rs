//! HTTP value model.
//!
//! Plain owned values; nothing in here performs I/O. Requests are what the
//! engine routes, responses are what it serves and what the stores persist.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Request method. Anything unusual is kept verbatim in [`Method::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Method {
    #[default]
    #[display("GET")]
    Get,
    #[display("HEAD")]
    Head,
    #[display("POST")]
    Post,
    #[display("PUT")]
    Put,
    #[display("PATCH")]
    Patch,
    #[display("DELETE")]
    Delete,
    #[display("OPTIONS")]
    Options,
    #[display("{_0}")]
    Other(String),
}
impl Method {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "OPTIONS" => Self::Options,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether a response to this method may be served from (or stored in) a cache.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}
impl From<String> for Method {
    fn from(method: String) -> Self {
        Self::parse(&method)
    }
}
impl From<Method> for String {
    fn from(method: Method) -> Self {
        method.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Top-level document load.
    Navigate,
    SameOrigin,
    NoCors,
    #[default]
    Cors,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
    ForceCache,
    OnlyIfCached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Basic,
    Cors,
    /// Cross-origin response whose status and body are hidden from us.
    Opaque,
    Error,
}

/// Ordered header list with case-insensitive lookups.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);
impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)).map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every value for `name` with a single `value`.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub mode: RequestMode,
    #[serde(default)]
    pub cache: CacheMode,
    #[serde(default)]
    pub headers: Headers,
}
impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            mode: RequestMode::default(),
            cache: CacheMode::default(),
            headers: Headers::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// A top-level document load accepting HTML, as a browser would issue it.
    pub fn navigate(url: impl Into<String>) -> Self {
        Self::get(url).with_mode(RequestMode::Navigate).with_header("Accept", "text/html,*/*;q=0.8")
    }

    pub fn with_mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cache_mode(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Same request (method, mode and headers) against a different URL.
    pub fn with_url(&self, url: impl Into<String>) -> Self {
        Self { url: url.into(), ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Vec<u8>,
    /// Final URL after any redirects the network layer followed.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub redirected: bool,
    #[serde(default)]
    pub kind: ResponseKind,
}
impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Headers::new(),
            body: body.into(),
            url: None,
            redirected: false,
            kind: ResponseKind::Basic,
        }
    }

    /// `200 OK` with the given body.
    pub fn ok_with(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, body).with_status_text("OK")
    }

    /// Placeholder served when the network can't be reached.
    pub fn gateway_timeout() -> Self {
        Self::new(504, Vec::new()).with_status_text("Gateway Timeout")
    }

    /// Opaque cross-origin response (status 0, no readable body).
    pub fn opaque() -> Self {
        Self { kind: ResponseKind::Opaque, ..Self::new(0, Vec::new()) }
    }

    pub fn with_status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = text.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Mark this response as the result of following a redirect to `url`.
    pub fn redirected_to(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self.redirected = true;
        self
    }

    /// Status in the `200..=299` range.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_opaque(&self) -> bool {
        self.kind == ResponseKind::Opaque
    }
}
