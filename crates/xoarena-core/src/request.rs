//! Request metadata as seen by the admission layer.
//!
//! The admission layer only needs case-insensitive header lookup and, as a
//! last resort, the authority of the request URL. [`RequestMeta`] is that
//! capability; it is implemented for the `http` request types used by the
//! server and for [`PlainHeaders`], a loose key/value mapping for callers
//! that do not carry an `http::HeaderMap`.

use http::request::Parts;
use http::{HeaderMap, Request};

pub trait RequestMeta {
    /// First value of header `name`, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// `host[:port]` of the request URL, when the URL is absolute.
    fn url_authority(&self) -> Option<&str> {
        None
    }
}

impl RequestMeta for HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}

impl RequestMeta for Parts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.header(name)
    }

    fn url_authority(&self) -> Option<&str> {
        self.uri.authority().map(|a| a.as_str())
    }
}

impl<B> RequestMeta for Request<B> {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().header(name)
    }

    fn url_authority(&self) -> Option<&str> {
        self.uri().authority().map(|a| a.as_str())
    }
}

/// Headers as an ordered list of name/value pairs.
///
/// Repeated names are allowed; lookup returns the first match.
#[derive(Debug, Clone, Default)]
pub struct PlainHeaders {
    pairs: Vec<(String, String)>,
    authority: Option<String>,
}

impl PlainHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((name.into(), value.into()));
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PlainHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = PlainHeaders::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

impl RequestMeta for PlainHeaders {
    fn header(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn url_authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_lookup_ignores_case() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "10.0.0.1".parse().unwrap());
        assert_eq!(headers.header("X-Real-IP"), Some("10.0.0.1"));
        assert_eq!(headers.header("x-forwarded-for"), None);
    }

    #[test]
    fn plain_headers_lookup_ignores_case() {
        let headers: PlainHeaders = [("X-Forwarded-For", "1.2.3.4")].into_iter().collect();
        assert_eq!(headers.header("x-forwarded-for"), Some("1.2.3.4"));
        assert_eq!(headers.header("X-FORWARDED-FOR"), Some("1.2.3.4"));
    }

    #[test]
    fn plain_headers_first_value_wins() {
        let mut headers = PlainHeaders::new();
        headers.insert("host", "a.example");
        headers.insert("Host", "b.example");
        assert_eq!(headers.header("HOST"), Some("a.example"));
    }

    #[test]
    fn request_exposes_absolute_url_authority() {
        let req = Request::builder()
            .uri("https://game.example:8443/api/match")
            .body(())
            .unwrap();
        assert_eq!(req.url_authority(), Some("game.example:8443"));

        let relative = Request::builder().uri("/api/match").body(()).unwrap();
        assert_eq!(relative.url_authority(), None);
    }
}
