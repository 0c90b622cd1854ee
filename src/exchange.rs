//! HTTP message fragments handed to the filters by the proxy engine
//!
//! The engine owns parsing and framing. A message reaches the filters as a
//! head fragment followed by zero or more content fragments. Method,
//! version, status and header types come from the `http` crate.

use std::borrow::Cow;
use std::fmt::{Display, Formatter, Result as FmtResult};

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};

/// CONNECT opens a tunnel instead of carrying a request
///
/// Extension methods keep their case, so a lowercase `connect` is matched
/// here as well.
pub fn is_tunnel(method: &Method) -> bool {
    method.as_str().eq_ignore_ascii_case(Method::CONNECT.as_str())
}

/// Request head: request line and headers
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Absolute URI for plain requests, `host:port` for CONNECT
    pub uri: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl Request {
    pub fn new(method: Method, uri: &str) -> Request {
        Request {
            method,
            uri: uri.to_string(),
            ..Request::default()
        }
    }

    /// Append a header, entries already stored under `name` are kept
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Request {
        self.headers.append(name, value);
        self
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} {} {:?}", self.method, self.uri, self.version)
    }
}

/// Response head: status line and headers
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub version: Version,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl Response {
    pub fn new(status: StatusCode) -> Response {
        Response {
            version: Version::HTTP_11,
            status,
            headers: HeaderMap::new(),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Response::new(StatusCode::OK)
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?} {}", self.version, self.status)
    }
}

/// A chunk of message body
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Content {
    pub data: Vec<u8>,
    /// Set on the final chunk of the message
    pub last: bool,
}

impl Content {
    pub fn new(data: &[u8], last: bool) -> Content {
        Content {
            data: data.to_vec(),
            last,
        }
    }

    /// Body text for logging, invalid UTF-8 is replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// One fragment of an HTTP message as the engine dispatches it
#[derive(Debug, Clone, PartialEq)]
pub enum HttpObject {
    Request(Request),
    Response(Response),
    Content(Content),
}

impl Display for HttpObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            HttpObject::Request(req) => write!(f, "{}", req),
            HttpObject::Response(res) => write!(f, "{}", res),
            HttpObject::Content(content) => write!(
                f,
                "content({} bytes{})",
                content.data.len(),
                if content.last { ", last" } else { "" }
            ),
        }
    }
}

/// `name: value` for logging, binary values are shown escaped
pub fn header_line(name: &HeaderName, value: &HeaderValue) -> String {
    match value.to_str() {
        Ok(text) => format!("{}: {}", name, text),
        Err(_) => format!("{}: {:?}", name, value),
    }
}

#[test]
fn tunnel_test() {
    assert!(is_tunnel(&Method::CONNECT));
    assert!(is_tunnel(&Method::from_bytes(b"connect").unwrap()));
    assert!(is_tunnel(&Method::from_bytes(b"Connect").unwrap()));
    assert!(!is_tunnel(&Method::GET));
    assert!(!is_tunnel(&Method::from_bytes(b"CONNECTX").unwrap()));
}

#[test]
fn display_test() {
    let req = Request::new(Method::GET, "http://anyhost/")
        .with_header(http::header::HOST, HeaderValue::from_static("anyhost"));
    assert_eq!(req.to_string(), "GET http://anyhost/ HTTP/1.1");
    assert_eq!(
        Response::new(StatusCode::NOT_FOUND).to_string(),
        "HTTP/1.1 404 Not Found"
    );

    let last = HttpObject::Content(Content::new(b"abc", true));
    assert_eq!(last.to_string(), "content(3 bytes, last)");

    let binary = HeaderValue::from_bytes(b"caf\xe9").unwrap();
    assert_eq!(header_line(&http::header::HOST, &binary), "host: \"caf\\xe9\"");
}
