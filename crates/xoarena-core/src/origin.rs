//! Best-effort caller network address, used as the secondary limiter key.

use crate::request::RequestMeta;

/// Returned when no forwarding header names the caller.
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// First entry of `X-Forwarded-For`, else `X-Real-IP`, else [`UNKNOWN_ORIGIN`].
///
/// All callers without forwarding headers share the `unknown` bucket.
pub fn resolve_origin<R: RequestMeta + ?Sized>(req: &R) -> String {
    let forwarded = req
        .header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = req
        .header("x-real-ip")
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .unwrap_or(UNKNOWN_ORIGIN)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::PlainHeaders;
    use http::HeaderMap;

    #[test]
    fn takes_first_forwarded_entry() {
        let headers: PlainHeaders =
            [("X-Forwarded-For", " 203.0.113.7 , 10.0.0.1")].into_iter().collect();
        assert_eq!(resolve_origin(&headers), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(resolve_origin(&headers), "198.51.100.2");
    }

    #[test]
    fn empty_forwarded_entry_falls_back_to_real_ip() {
        let headers: PlainHeaders = [("x-forwarded-for", " , 10.0.0.1"), ("X-REAL-IP", "192.0.2.9")]
            .into_iter()
            .collect();
        assert_eq!(resolve_origin(&headers), "192.0.2.9");
    }

    #[test]
    fn missing_headers_yield_unknown() {
        assert_eq!(resolve_origin(&HeaderMap::new()), UNKNOWN_ORIGIN);
        assert_eq!(resolve_origin(&PlainHeaders::new()), UNKNOWN_ORIGIN);
    }
}
