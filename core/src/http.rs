//! Plain-data request and response types shared by both call paths.
//!
//! # Design
//! The held-client path hands an `HttpRequest` to `ureq`; the persistent
//! connection path serializes the same value onto the wire with `to_wire`.
//! Keeping one request type means header override rules are identical on
//! both paths, and the session can keep the last-built request around for
//! inspection.
//!
//! Headers are an ordered list with case-insensitive replace-on-set
//! semantics. Names and values are validated against `http` header rules as
//! they are set, so a bad header fails before any I/O happens.

use std::collections::HashMap;
use std::fmt;

use ureq::http::{HeaderName, HeaderValue};
use url::Url;

use crate::error::HttpError;
use crate::types::BodyKind;

/// HTTP method for a request. Only the two the session issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Build a request with no headers and an empty body.
    pub fn new(method: HttpMethod, address: &str) -> Result<Self, HttpError> {
        let url = Url::parse(address).map_err(|source| HttpError::InvalidUrl {
            address: address.to_string(),
            source,
        })?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        })
    }

    /// Build a request the way every session call does: caller headers
    /// first, then the content-type of `body`'s encoding, which overrides
    /// any content-type the caller supplied.
    pub fn prepare(
        method: HttpMethod,
        address: &str,
        body: Option<(BodyKind, &str)>,
        headers: Option<&HashMap<String, String>>,
    ) -> Result<Self, HttpError> {
        let mut request = Self::new(method, address)?;
        if let Some(headers) = headers {
            request.apply_headers(headers)?;
        }
        if let Some((kind, data)) = body {
            request.set_header("Content-Type", kind.content_type())?;
            request = request.with_body(data);
        }
        Ok(request)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a header, replacing any existing header with the same name
    /// regardless of case.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), HttpError> {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| HttpError::InvalidRequest(format!("header name `{name}`: {e}")))?;
        HeaderValue::from_str(value)
            .map_err(|e| HttpError::InvalidRequest(format!("value of header `{name}`: {e}")))?;
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// Apply every header from `headers`, in key order so the wire form is
    /// stable across runs.
    pub fn apply_headers(&mut self, headers: &HashMap<String, String>) -> Result<(), HttpError> {
        let mut sorted: Vec<_> = headers.iter().collect();
        sorted.sort();
        for (name, value) in sorted {
            self.set_header(name, value)?;
        }
        Ok(())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Path plus query, as written on the request line.
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    /// Value for the `Host` header: host, plus the port when it is not the
    /// scheme default.
    pub fn host_header(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// Serialize as an HTTP/1.1 request.
    ///
    /// `Content-Length` is always computed from the body; a caller-supplied
    /// one is dropped so the framing cannot disagree with the payload.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.request_target());
        if self.header("host").is_none() {
            head.push_str(&format!("Host: {}\r\n", self.host_header()));
        }
        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if self.method == HttpMethod::Post || !self.body.is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("\r\n");

        let mut wire = head.into_bytes();
        wire.extend_from_slice(&self.body);
        wire
    }
}

/// A fully-buffered HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_relative_address() {
        let err = HttpRequest::new(HttpMethod::Get, "/only/a/path").unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl { .. }));
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut req = HttpRequest::new(HttpMethod::Post, "http://localhost/x").unwrap();
        req.set_header("Content-Type", "text/plain").unwrap();
        req.set_header("content-type", "application/json").unwrap();
        assert_eq!(req.headers, vec![("content-type".to_string(), "application/json".to_string())]);
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn set_header_rejects_invalid_name_and_value() {
        let mut req = HttpRequest::new(HttpMethod::Get, "http://localhost/").unwrap();
        assert!(matches!(
            req.set_header("bad header", "v"),
            Err(HttpError::InvalidRequest(_))
        ));
        assert!(matches!(
            req.set_header("x-ok", "line\nbreak"),
            Err(HttpError::InvalidRequest(_))
        ));
        assert!(req.headers.is_empty());
    }

    #[test]
    fn apply_headers_is_ordered_by_name() {
        let mut req = HttpRequest::new(HttpMethod::Get, "http://localhost/").unwrap();
        let headers = HashMap::from([
            ("x-b".to_string(), "2".to_string()),
            ("x-a".to_string(), "1".to_string()),
        ]);
        req.apply_headers(&headers).unwrap();
        assert_eq!(req.headers[0].0, "x-a");
        assert_eq!(req.headers[1].0, "x-b");
    }

    #[test]
    fn host_header_includes_non_default_port() {
        let req = HttpRequest::new(HttpMethod::Get, "http://example.com:8080/a").unwrap();
        assert_eq!(req.host_header(), "example.com:8080");
        let req = HttpRequest::new(HttpMethod::Get, "https://example.com:443/a").unwrap();
        assert_eq!(req.host_header(), "example.com");
    }

    #[test]
    fn get_wire_form() {
        let mut req = HttpRequest::new(HttpMethod::Get, "http://example.com:8080/items?page=2").unwrap();
        req.set_header("Accept", "*/*").unwrap();
        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert_eq!(
            wire,
            "GET /items?page=2 HTTP/1.1\r\nHost: example.com:8080\r\nAccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn post_wire_form_computes_content_length() {
        let mut req = HttpRequest::new(HttpMethod::Post, "http://example.com/submit")
            .unwrap()
            .with_body("a=1&b=2");
        req.set_header("Content-Length", "999").unwrap();
        req.set_header("Content-Type", "application/x-www-form-urlencoded").unwrap();
        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert!(wire.starts_with("POST /submit HTTP/1.1\r\nHost: example.com\r\n"));
        assert!(wire.contains("Content-Length: 7\r\n"));
        assert!(!wire.contains("999"));
        assert!(wire.ends_with("\r\n\r\na=1&b=2"));
    }

    #[test]
    fn response_success_range() {
        let mut response = HttpResponse {
            status: 200,
            reason: "OK".to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(response.is_success());
        response.status = 299;
        assert!(response.is_success());
        response.status = 300;
        assert!(!response.is_success());
        response.status = 199;
        assert!(!response.is_success());
    }
}
