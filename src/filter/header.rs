use http::header::{HeaderMap, HeaderValue, InvalidHeaderValue, HOST, REFERER};
use log::debug;

use crate::config::Target;
use crate::exchange::header_line;

/// Points `Host` and `Referer` at the backend
///
/// `Host` is always replaced, `Referer` only when the request had one.
/// Every other header is forwarded untouched.
#[derive(Debug, Clone)]
pub struct HeaderRewriter {
    host: HeaderValue,
    referer: HeaderValue,
}

impl HeaderRewriter {
    pub fn new(backend: &Target) -> Result<HeaderRewriter, InvalidHeaderValue> {
        Ok(HeaderRewriter {
            host: HeaderValue::from_str(&backend.authority())?,
            referer: HeaderValue::from_str(&format!("http://{}/", backend.authority()))?,
        })
    }

    pub fn rewrite(&self, headers: &mut HeaderMap) {
        for (key, value) in headers.iter() {
            debug!("header before rewrite: {}", header_line(key, value));
        }

        // insert drops every value already stored under the name
        if headers.contains_key(REFERER) {
            headers.insert(REFERER, self.referer.clone());
        }
        headers.insert(HOST, self.host.clone());

        for (key, value) in headers.iter() {
            debug!("header after rewrite: {}", header_line(key, value));
        }
    }
}

#[cfg(test)]
use http::header::{HeaderName, ACCEPT_ENCODING, CONTENT_LENGTH, COOKIE};

#[cfg(test)]
fn rewriter() -> HeaderRewriter {
    HeaderRewriter::new(&Target::new("192.168.56.1", 6080)).unwrap()
}

#[test]
fn rewrite_host_test() {
    let mut headers = HeaderMap::new();
    headers.append(HOST, HeaderValue::from_static("anyhost"));
    headers.append(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    headers.append(HOST, HeaderValue::from_static("duplicate"));
    headers.append(COOKIE, HeaderValue::from_static("a=b"));
    rewriter().rewrite(&mut headers);

    assert_eq!(
        headers.get_all(HOST).iter().collect::<Vec<_>>(),
        vec!["192.168.56.1:6080"]
    );
    assert!(!headers.contains_key(REFERER));
    assert_eq!(headers.get(ACCEPT_ENCODING).unwrap(), "gzip");
    assert_eq!(headers.get(COOKIE).unwrap(), "a=b");
    assert_eq!(headers.len(), 3);
}

#[test]
fn rewrite_missing_host_test() {
    let mut headers = HeaderMap::new();
    rewriter().rewrite(&mut headers);
    assert_eq!(headers.get(HOST).unwrap(), "192.168.56.1:6080");
    assert_eq!(headers.len(), 1);
}

#[test]
fn rewrite_referer_test() {
    // names read off the wire in any case land on the same entry
    let mixed = HeaderName::from_bytes(b"ReFeReR").unwrap();
    let mut headers = HeaderMap::new();
    headers.append(HeaderName::from_bytes(b"HOST").unwrap(), HeaderValue::from_static("anyhost"));
    headers.append(mixed, HeaderValue::from_static("http://anyhost/"));
    headers.append(REFERER, HeaderValue::from_static("http://anyhost/index.html"));
    rewriter().rewrite(&mut headers);

    assert_eq!(
        headers.get_all(REFERER).iter().collect::<Vec<_>>(),
        vec!["http://192.168.56.1:6080/"]
    );
    assert_eq!(headers.get(HOST).unwrap(), "192.168.56.1:6080");
}

#[test]
fn rewrite_idempotent_test() {
    let mut once = HeaderMap::new();
    once.append(HOST, HeaderValue::from_static("anyhost"));
    once.append(REFERER, HeaderValue::from_static("http://anyhost/"));
    once.append(CONTENT_LENGTH, HeaderValue::from_static("12"));
    rewriter().rewrite(&mut once);

    let mut twice = once.clone();
    rewriter().rewrite(&mut twice);
    assert_eq!(once, twice);
}

#[test]
fn invalid_backend_test() {
    assert!(HeaderRewriter::new(&Target::new("bad\nhost", 6080)).is_err());
}
