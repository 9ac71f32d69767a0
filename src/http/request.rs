//! Immutable inbound request description.
//!
//! Transports either hand the dispatcher raw HTTP/1.1 bytes through
//! [`Request::parse`] (backed by [`httparse`]) or decode the message themselves
//! and assemble it with [`Request::builder`].

use std::collections::HashMap;

use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete; more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request body is not valid UTF-8")]
    InvalidBody(#[from] std::str::Utf8Error),

    #[error("request exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
}

/// An inbound request message.
///
/// Immutable once built: the route table's path variables are attached while
/// the dispatcher assembles the request, before any handler sees it.
///
/// # Examples
///
/// ```
/// use gale::http::Request;
///
/// let raw = b"GET /hello?name=world&name=rust HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _consumed) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.query_params("name"), ["world", "rust"]);
/// assert!(request.is_keep_alive());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    params: HashMap<String, Vec<String>>,
    path_variables: HashMap<String, String>,
    body: Option<String>,
    keep_alive: bool,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the number of bytes it occupied in
    /// `buf` (headers plus a `Content-Length` body).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: headers or body not fully buffered yet.
    /// - [`RequestError::Parse`]: the data is malformed.
    /// - [`RequestError::MissingField`]: method, path or version is absent.
    /// - [`RequestError::InvalidBody`]: the body is not UTF-8 text.
    /// - [`RequestError::InvalidContentLength`]: `Content-Length` is not a
    ///   number or does not fit in memory.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        Self::parse_limited(buf, usize::MAX)
    }

    /// Like [`Request::parse`], but rejects a request whose headers plus
    /// declared body exceed `limit` bytes as soon as the headers are in,
    /// without waiting for the body.
    ///
    /// # Errors
    ///
    /// Everything [`Request::parse`] returns, plus [`RequestError::TooLarge`].
    pub fn parse_limited(buf: &[u8], limit: usize) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = Method::from(
            raw_req
                .method
                .ok_or(RequestError::MissingField { field: "method" })?,
        );
        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;
        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut builder = Request::builder(method, target).version(version);
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                builder = builder.header(header.name, value);
            }
        }

        let content_length = match builder.headers.get("content-length") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| RequestError::InvalidContentLength(raw.to_owned()))?,
            None => 0,
        };
        let consumed = body_offset
            .checked_add(content_length)
            .ok_or_else(|| RequestError::InvalidContentLength(content_length.to_string()))?;
        if consumed > limit {
            return Err(RequestError::TooLarge { limit });
        }
        if buf.len() < consumed {
            return Err(RequestError::Incomplete);
        }

        let body = std::str::from_utf8(&buf[body_offset..consumed])?;
        if !body.is_empty() {
            builder = builder.body(body);
        }

        Ok((builder.build(), consumed))
    }

    /// Start assembling a request for `target` (path plus optional query string).
    pub fn builder(method: impl Into<Method>, target: &str) -> RequestBuilder {
        RequestBuilder::new(method.into(), target)
    }

    /// Returns a copy of this request carrying the given path variables.
    pub(crate) fn with_path_variables(&self, path_variables: HashMap<String, String>) -> Self {
        Self {
            path_variables,
            ..self.clone()
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the normalized request path (no query string, no trailing slash).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the first decoded value of a query parameter.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every decoded value of a query parameter, in request order.
    pub fn query_params(&self, key: &str) -> &[String] {
        self.params.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Path variables bound by the matched route pattern.
    pub fn path_variables(&self) -> &HashMap<String, String> {
        &self.path_variables
    }

    /// Returns the body text, or `None` when the request carried no body.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive unless `Connection: close` is present.
    /// HTTP/1.0 defaults to close unless `Connection: keep-alive` is present.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

/// Assembles a [`Request`] from already-decoded parts.
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    target: String,
    version: u8,
    headers: Headers,
    body: Option<String>,
}

impl RequestBuilder {
    fn new(method: Method, target: &str) -> Self {
        Self {
            method,
            target: target.to_owned(),
            version: 1,
            headers: Headers::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn version(mut self, minor: u8) -> Self {
        self.version = minor;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn build(self) -> Request {
        let target = self.target.split('#').next().unwrap_or_default();
        let (raw_path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_owned())),
            None => (target, None),
        };

        let params = query.as_deref().map(parse_query_string).unwrap_or_default();
        let keep_alive = keep_alive(&self.headers, self.version);

        Request {
            method: self.method,
            path: normalize_path(raw_path),
            version: self.version,
            headers: self.headers,
            query,
            params,
            path_variables: HashMap::new(),
            body: self.body,
            keep_alive,
        }
    }
}

fn keep_alive(headers: &Headers, version: u8) -> bool {
    let tokens = || {
        headers
            .get_all("connection")
            .flat_map(|value| value.split(','))
            .map(str::trim)
    };
    if version == 0 {
        tokens().any(|t| t.eq_ignore_ascii_case("keep-alive"))
    } else {
        !tokens().any(|t| t.eq_ignore_ascii_case("close"))
    }
}

/// Ensures a leading `/` and strips a trailing one (except for the root).
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    }
}

/// Parses `key=value&key=value2` into a multimap, decoding `+` and `%XX`.
fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(percent_decode(key))
            .or_default()
            .push(percent_decode(value));
    }
    params
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                match (hex_digit(bytes[i + 1]), hex_digit(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
