//! Destination rewriting

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use log::{debug, error, warn};
use url::Url;

use crate::config::{Config, Target};
use crate::error::{NotifyError, UriError};
use crate::exchange::is_tunnel;
use crate::notify::Notifier;
use crate::pool::ThreadPool;

/// Computes the URI a request is sent to instead of its own
pub struct Retargeter {
    backend: Target,
    bootstrap: String,
    preserve_query: bool,
    pool: ThreadPool,
    /// How long a CONNECT head waits for the side channel, `None` to not wait
    ack_wait: Option<Duration>,
}

impl Retargeter {
    pub fn new(config: &Config) -> Retargeter {
        let side_channel = &config.side_channel;
        let notifier = Arc::new(Notifier::new(side_channel));

        Retargeter {
            backend: config.backend.target(),
            bootstrap: config.backend.bootstrap_path(),
            preserve_query: config.backend.preserve_query,
            pool: ThreadPool::new(side_channel.workers.max(1), notifier),
            ack_wait: if side_channel.wait_for_ack {
                Some(side_channel.deadline())
            } else {
                None
            },
        }
    }

    pub fn backend(&self) -> &Target {
        &self.backend
    }

    /// The new URI for a request made with `method` to `uri`
    ///
    /// A CONNECT target is replaced by the backend after the side channel
    /// has been told about it. Anything else keeps its scheme and path
    /// against the backend, a root path becomes the bootstrap resource.
    /// The path is copied as the client wrote it, without normalization.
    /// A URI that does not parse is returned as is.
    pub fn retarget(&self, method: &Method, uri: &str) -> String {
        if is_tunnel(method) {
            self.announce(uri);
            return self.backend.authority();
        }

        match self.rewrite(uri) {
            Ok(new_uri) => new_uri,
            Err(err) => {
                error!("can not retarget {}: {}, keep the original uri", uri, err);
                uri.to_string()
            }
        }
    }

    fn rewrite(&self, uri: &str) -> Result<String, UriError> {
        let uri = uri.trim();
        // parsed for validation and the scheme only, the url crate
        // normalizes the path it hands back
        let url = Url::parse(uri)?;
        if url.cannot_be_a_base() {
            return Err(UriError::NotHierarchical);
        }
        let (path, query) = raw_path_and_query(uri).ok_or(UriError::NotHierarchical)?;

        let mut new_uri = format!("{}://{}", url.scheme(), self.backend.authority());
        if path.is_empty() || path == "/" {
            new_uri.push_str(&self.bootstrap);
        } else {
            new_uri.push_str(path);
            if self.preserve_query {
                if let Some(query) = query {
                    new_uri.push('?');
                    new_uri.push_str(query);
                }
            }
        }
        Ok(new_uri)
    }

    // the outcome never changes the redirect
    fn announce(&self, destination: &str) {
        let pending = self.pool.execute(destination);
        let wait = match self.ack_wait {
            Some(wait) => wait,
            None => return,
        };

        match pending.wait(wait) {
            Ok(_) => debug!("side channel done with {}", destination),
            Err(NotifyError::Busy) => warn!(
                "side channel backlog too long, {} is redirected unannounced",
                destination
            ),
            Err(err) if err.is_timeout() => warn!(
                "side channel too slow for {}: {}, redirect anyway",
                destination, err
            ),
            Err(err) => debug!("side channel failed for {}: {}, redirect anyway", destination, err),
        }
    }
}

/// Path and query of `scheme://authority/path?query#fragment` exactly as
/// written, `None` when there is no `//` authority
fn raw_path_and_query(uri: &str) -> Option<(&str, Option<&str>)> {
    let scheme_end = uri.find(':')?;
    let rest = uri[scheme_end + 1..].strip_prefix("//")?;

    let after_authority = match rest.find(|c: char| c == '/' || c == '?' || c == '#') {
        Some(start) => &rest[start..],
        None => "",
    };
    let without_fragment = match after_authority.find('#') {
        Some(end) => &after_authority[..end],
        None => after_authority,
    };

    match without_fragment.find('?') {
        Some(start) => Some((
            &without_fragment[..start],
            Some(&without_fragment[start + 1..]),
        )),
        None => Some((without_fragment, None)),
    }
}

#[cfg(test)]
pub(crate) fn test_retargeter(preserve_query: bool) -> Retargeter {
    let mut config = Config::default();
    config.backend.preserve_query = preserve_query;
    config.side_channel = crate::notify::test_config(crate::notify::closed_port(), 200);
    config.side_channel.workers = 1;
    Retargeter::new(&config)
}

#[test]
fn retarget_root_test() {
    let retargeter = test_retargeter(false);
    let bootstrap = "/vnc_lite.html?host=192.168.56.1&port=6080";

    for uri in &[
        "http://anyhost/",
        "http://anyhost",
        "http://anyhost:8080/?q=1",
        "https://secure.example.org/#top",
    ] {
        let new_uri = retargeter.retarget(&Method::GET, uri);
        let scheme = Url::parse(uri).unwrap().scheme().to_string();
        assert_eq!(new_uri, format!("{}://192.168.56.1:6080{}", scheme, bootstrap));
    }
}

#[test]
fn retarget_path_test() {
    let retargeter = test_retargeter(false);

    assert_eq!(
        retargeter.retarget(&Method::GET, "http://anyhost/app.js"),
        "http://192.168.56.1:6080/app.js"
    );
    assert_eq!(
        retargeter.retarget(&Method::POST, "https://a.b.c:8443/core/rfb.js?v=2#frag"),
        "https://192.168.56.1:6080/core/rfb.js"
    );
    assert_eq!(
        retargeter.retarget(&Method::PUT, "http://x/a/b/"),
        "http://192.168.56.1:6080/a/b/"
    );
}

#[test]
fn retarget_raw_path_test() {
    let retargeter = test_retargeter(false);
    let backend = "http://192.168.56.1:6080";

    for (uri, path) in &[
        ("http://anyhost/a/../b", "/a/../b"),
        ("http://anyhost/a/..", "/a/.."),
        ("http://anyhost/./app.js", "/./app.js"),
        ("http://anyhost/a b.js", "/a b.js"),
        ("http://anyhost/%2e%2e/app.js", "/%2e%2e/app.js"),
        ("http://anyhost/caf%C3%A9/%7Euser", "/caf%C3%A9/%7Euser"),
        ("http://anyhost/\u{e9}t\u{e9}.js", "/\u{e9}t\u{e9}.js"),
        ("http:///x.js", "/x.js"),
        ("http://user:pw@anyhost:81/p;v=1", "/p;v=1"),
    ] {
        assert_eq!(retargeter.retarget(&Method::GET, uri), format!("{}{}", backend, path));
    }
}

#[test]
fn raw_path_and_query_test() {
    assert_eq!(raw_path_and_query("http://h"), Some(("", None)));
    assert_eq!(raw_path_and_query("http://h?q=1#f"), Some(("", Some("q=1"))));
    assert_eq!(raw_path_and_query("http://h/a?b?c#d?e"), Some(("/a", Some("b?c"))));
    assert_eq!(raw_path_and_query("http://h#/not/a/path"), Some(("", None)));
    assert_eq!(raw_path_and_query("http:anyhost/x"), None);
}

#[test]
fn retarget_authority_test() {
    let retargeter = test_retargeter(false);
    for uri in &["http://one/", "https://two:444/x", "ws://three/socket", "ftp://four/f.txt"] {
        let new_uri = retargeter.retarget(&Method::GET, uri);
        let url = Url::parse(&new_uri).unwrap();
        assert_eq!(url.host_str(), Some("192.168.56.1"));
        assert_eq!(url.port_or_known_default(), Some(6080));
    }
}

#[test]
fn retarget_preserve_query_test() {
    let retargeter = test_retargeter(true);
    assert_eq!(
        retargeter.retarget(&Method::GET, "http://anyhost/app.js?v=3"),
        "http://192.168.56.1:6080/app.js?v=3"
    );
    // kept as written, not re-encoded
    assert_eq!(
        retargeter.retarget(&Method::GET, "http://anyhost/a/../app.js?q=a b&x=%2F#frag"),
        "http://192.168.56.1:6080/a/../app.js?q=a b&x=%2F"
    );
    // root is still the bootstrap resource
    assert_eq!(
        retargeter.retarget(&Method::GET, "http://anyhost/?v=3"),
        "http://192.168.56.1:6080/vnc_lite.html?host=192.168.56.1&port=6080"
    );
}

#[test]
fn retarget_malformed_test() {
    let retargeter = test_retargeter(false);
    for uri in &[
        "/relative/path",
        "not a uri",
        "mailto:someone@example.com",
        "",
        "http:anyhost/x",
    ] {
        assert_eq!(retargeter.retarget(&Method::GET, uri), *uri);
    }
}

#[test]
fn retarget_connect_refused_test() {
    let retargeter = test_retargeter(false);
    assert_eq!(
        retargeter.retarget(&Method::CONNECT, "example.com:443"),
        "192.168.56.1:6080"
    );
}
