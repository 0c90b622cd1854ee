//! The retargeting filter
//!
//! Every request leaving the proxy is pointed at the backend: the URI goes
//! through the [`Retargeter`], `Host` and `Referer` through the
//! [`HeaderRewriter`]. Bodies and responses are only observed, unless a
//! response override is configured.

use std::sync::Arc;

use log::{debug, info, warn};

use super::header::HeaderRewriter;
use super::response::{Replacement, ResponseRewriter};
use super::uri::Retargeter;
use super::{FilterStatus, FiltersSource, HttpFilters};
use crate::config::Config;
use crate::error::ConfigError;
use crate::exchange::{header_line, Content, HttpObject, Request};

/// Where an exchange stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RequestHead,
    RequestBody,
    ResponseHead,
    ResponseBody,
    Complete,
}

// read-only after start, shared by every filter
struct Shared {
    retargeter: Retargeter,
    headers: HeaderRewriter,
    response: ResponseRewriter,
    dump_bodies: bool,
}

/// Creates a [`RetargetingFilter`] for each client request
pub struct RetargetingSource {
    shared: Arc<Shared>,
}

impl RetargetingSource {
    /// Validates `config` and starts the notification workers
    pub fn new(config: &Config) -> Result<RetargetingSource, ConfigError> {
        config.validate()?;
        let retargeter = Retargeter::new(config);
        let headers = HeaderRewriter::new(retargeter.backend()).map_err(|err| {
            ConfigError::Invalid(vec![format!("backend address as Host header: {}", err)])
        })?;

        info!(
            "retarget all traffic to {}, side channel {}",
            retargeter.backend(),
            config.side_channel.target()
        );
        match config.to_json() {
            Ok(json) => debug!("config: {}", json),
            Err(err) => warn!("can not serialize config: {}", err),
        }

        Ok(RetargetingSource {
            shared: Arc::new(Shared {
                retargeter,
                headers,
                response: ResponseRewriter::new(&config.response),
                dump_bodies: config.log.dump_bodies,
            }),
        })
    }

    /// The concrete filter, for callers that do not need a trait object
    pub fn filter(&self, original: &Request) -> RetargetingFilter {
        RetargetingFilter {
            original: original.clone(),
            shared: Arc::clone(&self.shared),
            phase: Phase::RequestHead,
            replacement: None,
        }
    }
}

impl FiltersSource for RetargetingSource {
    fn filter_request(&self, original: &Request) -> Box<dyn HttpFilters> {
        Box::new(self.filter(original))
    }
}

/// Filter bound to one request/response exchange
pub struct RetargetingFilter {
    /// The request as the client sent it, never modified
    original: Request,
    shared: Arc<Shared>,
    phase: Phase,
    replacement: Option<Replacement>,
}

impl RetargetingFilter {
    pub fn original(&self) -> &Request {
        &self.original
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn observe_body(&self, direction: &str, content: &Content) {
        if self.shared.dump_bodies {
            info!("{} body: {}", direction, content.text());
        } else {
            debug!("{} body: {} bytes", direction, content.data.len());
        }
    }

    // out-of-order fragments are logged, never rejected
    fn check_phase(&self, allowed: &[Phase], object: &HttpObject) {
        if !allowed.contains(&self.phase) {
            warn!(
                "{} {}: unexpected {} while in {:?}",
                self.original.method, self.original.uri, object, self.phase
            );
        }
    }
}

impl HttpFilters for RetargetingFilter {
    fn on_outbound_request_fragment(&mut self, object: &mut HttpObject) -> FilterStatus {
        debug!("client -> proxy: {} {}", self.original.method, self.original.uri);

        match object {
            HttpObject::Request(req) => {
                if self.phase != Phase::RequestHead {
                    warn!("{}: second request head {}", self.original.uri, req);
                }
                self.phase = Phase::RequestBody;

                let new_uri = self.shared.retargeter.retarget(&self.original.method, &req.uri);
                self.shared.headers.rewrite(&mut req.headers);
                info!("{} {} -> {}", req.method, req.uri, new_uri);
                req.uri = new_uri;
            }
            HttpObject::Content(content) => {
                if self.phase != Phase::RequestBody {
                    warn!("{}: request content while in {:?}", self.original.uri, self.phase);
                }
                self.observe_body("request", content);
                if content.last {
                    self.phase = Phase::ResponseHead;
                }
            }
            HttpObject::Response(res) => {
                warn!("{}: response head {} in the request stream, pass through", self.original.uri, res);
            }
        }

        FilterStatus::Forward
    }

    fn on_upstream_request_fragment(&mut self, object: &HttpObject) -> FilterStatus {
        debug!("proxy -> server: {}", object);
        FilterStatus::Forward
    }

    fn on_inbound_response_fragment(&mut self, mut object: HttpObject) -> HttpObject {
        debug!("server -> proxy: {}", object);
        self.check_phase(&[Phase::RequestBody, Phase::ResponseHead, Phase::ResponseBody], &object);

        match &mut object {
            HttpObject::Response(res) => {
                // a request without a body never sends its last chunk
                self.phase = Phase::ResponseBody;
                for (key, value) in res.headers.iter() {
                    debug!("response header: {}", header_line(key, value));
                }
                if self.shared.response.enabled() {
                    self.replacement = self.shared.response.rewrite_head(res);
                }
            }
            HttpObject::Content(content) => {
                self.observe_body("response", content);
                if let Some(replacement) = self.replacement.as_mut() {
                    replacement.apply(content);
                }
                if content.last {
                    self.phase = Phase::Complete;
                    debug!("{} {} complete", self.original.method, self.original.uri);
                }
            }
            HttpObject::Request(req) => {
                warn!("{}: request head {} in the response stream, pass through", self.original.uri, req);
            }
        }

        object
    }
}

#[cfg(test)]
use crate::exchange::Response;
#[cfg(test)]
use http::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_LENGTH, HOST, REFERER};
#[cfg(test)]
use http::{Method, StatusCode};

#[cfg(test)]
fn source_with(side_channel_port: u16) -> RetargetingSource {
    let mut config = Config::default();
    config.side_channel = crate::notify::test_config(side_channel_port, 2000);
    config.side_channel.workers = 1;
    RetargetingSource::new(&config).unwrap()
}

#[cfg(test)]
fn head(object: &HttpObject) -> &Request {
    match object {
        HttpObject::Request(req) => req,
        other => panic!("expected a request head, got {}", other),
    }
}

#[test]
fn root_request_test() {
    let source = source_with(crate::notify::closed_port());
    let original = Request::new(Method::GET, "http://anyhost/").with_header(HOST, HeaderValue::from_static("anyhost"));
    let mut filter = source.filter_request(&original);

    let mut object = HttpObject::Request(original.clone());
    assert_eq!(filter.on_outbound_request_fragment(&mut object), FilterStatus::Forward);

    let req = head(&object);
    assert_eq!(
        req.uri,
        "http://192.168.56.1:6080/vnc_lite.html?host=192.168.56.1&port=6080"
    );
    assert_eq!(
        req.headers.get_all(HOST).iter().collect::<Vec<_>>(),
        vec!["192.168.56.1:6080"]
    );
    assert!(!req.headers.contains_key(REFERER));
    assert_eq!(filter.on_upstream_request_fragment(&object), FilterStatus::Forward);
}

#[test]
fn asset_request_test() {
    let source = source_with(crate::notify::closed_port());
    let original = Request::new(Method::GET, "http://anyhost/app.js")
        .with_header(HOST, HeaderValue::from_static("anyhost"))
        .with_header(REFERER, HeaderValue::from_static("http://anyhost/"))
        .with_header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
    let mut filter = source.filter(&original);

    let mut object = HttpObject::Request(original.clone());
    filter.on_outbound_request_fragment(&mut object);

    let req = head(&object);
    assert_eq!(req.uri, "http://192.168.56.1:6080/app.js");
    assert_eq!(req.headers.get(HOST).unwrap(), "192.168.56.1:6080");
    assert_eq!(
        req.headers.get_all(REFERER).iter().collect::<Vec<_>>(),
        vec!["http://192.168.56.1:6080/"]
    );
    assert_eq!(req.headers.get(ACCEPT_ENCODING).unwrap(), "gzip");
    // the intercepted request stays as it was
    assert_eq!(filter.original(), &original);
}

#[test]
fn connect_notifies_side_channel_test() {
    let command = "window.location=\"http://example.com:443\"";
    let (port, peer) = crate::notify::spawn_peer(command.len(), "ok\n");
    let source = source_with(port);

    let original = Request::new(Method::CONNECT, "example.com:443").with_header(HOST, HeaderValue::from_static("example.com:443"));
    let mut filter = source.filter(&original);
    let mut object = HttpObject::Request(original.clone());
    filter.on_outbound_request_fragment(&mut object);

    // waiting for the acknowledgment is the default
    assert_eq!(peer.join().unwrap(), command);
    let req = head(&object);
    assert_eq!(req.uri, "192.168.56.1:6080");
    assert_eq!(req.headers.get(HOST).unwrap(), "192.168.56.1:6080");
}

#[test]
fn connect_refused_test() {
    let source = source_with(crate::notify::closed_port());
    let original = Request::new(Method::from_bytes(b"connect").unwrap(), "example.com:443");
    let mut filter = source.filter_request(&original);

    let mut object = HttpObject::Request(original.clone());
    assert_eq!(filter.on_outbound_request_fragment(&mut object), FilterStatus::Forward);
    assert_eq!(head(&object).uri, "192.168.56.1:6080");
}

#[test]
fn connect_without_waiting_test() {
    let mut config = Config::default();
    config.side_channel = crate::notify::test_config(crate::notify::closed_port(), 2000);
    config.side_channel.wait_for_ack = false;
    let source = RetargetingSource::new(&config).unwrap();

    let original = Request::new(Method::CONNECT, "example.com:443");
    let mut object = HttpObject::Request(original.clone());
    source.filter(&original).on_outbound_request_fragment(&mut object);
    assert_eq!(head(&object).uri, "192.168.56.1:6080");
}

#[test]
fn malformed_uri_test() {
    let source = source_with(crate::notify::closed_port());
    let original = Request::new(Method::GET, "/index.html").with_header(HOST, HeaderValue::from_static("anyhost"));
    let mut object = HttpObject::Request(original.clone());
    source.filter(&original).on_outbound_request_fragment(&mut object);

    let req = head(&object);
    assert_eq!(req.uri, "/index.html");
    assert_eq!(req.headers.get(HOST).unwrap(), "192.168.56.1:6080");
}

#[test]
fn exchange_lifecycle_test() {
    let source = source_with(crate::notify::closed_port());
    let original = Request::new(Method::POST, "http://anyhost/submit");
    let mut filter = source.filter(&original);
    assert_eq!(filter.phase(), Phase::RequestHead);

    let mut object = HttpObject::Request(original.clone());
    filter.on_outbound_request_fragment(&mut object);
    assert_eq!(filter.phase(), Phase::RequestBody);

    let mut body = HttpObject::Content(Content::new(b"a=1", true));
    let before = body.clone();
    filter.on_outbound_request_fragment(&mut body);
    assert_eq!(body, before);
    assert_eq!(filter.phase(), Phase::ResponseHead);

    let mut res = Response::default();
    res.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2"));
    let res = HttpObject::Response(res);
    assert_eq!(filter.on_inbound_response_fragment(res.clone()), res);
    assert_eq!(filter.phase(), Phase::ResponseBody);

    let chunk = HttpObject::Content(Content::new(b"o", false));
    assert_eq!(filter.on_inbound_response_fragment(chunk.clone()), chunk);
    let last = HttpObject::Content(Content::new(b"k", true));
    assert_eq!(filter.on_inbound_response_fragment(last.clone()), last);
    assert_eq!(filter.phase(), Phase::Complete);
}

#[test]
fn unexpected_fragment_test() {
    let source = source_with(crate::notify::closed_port());
    let original = Request::new(Method::GET, "http://anyhost/");
    let mut filter = source.filter(&original);

    let mut stray = HttpObject::Response(Response::new(StatusCode::INTERNAL_SERVER_ERROR));
    let before = stray.clone();
    assert_eq!(filter.on_outbound_request_fragment(&mut stray), FilterStatus::Forward);
    assert_eq!(stray, before);
    assert_eq!(filter.phase(), Phase::RequestHead);

    let echoed = HttpObject::Request(original.clone());
    assert_eq!(filter.on_inbound_response_fragment(echoed.clone()), echoed);
}

#[test]
fn response_override_test() {
    let mut config = Config::default();
    config.side_channel = crate::notify::test_config(crate::notify::closed_port(), 200);
    config.side_channel.workers = 1;
    config.response.body_file = Some("test/replacement.html".to_string());
    let source = RetargetingSource::new(&config).unwrap();

    let original = Request::new(Method::GET, "http://anyhost/");
    let mut filter = source.filter(&original);
    let mut object = HttpObject::Request(original.clone());
    filter.on_outbound_request_fragment(&mut object);

    filter.on_inbound_response_fragment(HttpObject::Response(Response::default()));
    let body = filter.on_inbound_response_fragment(HttpObject::Content(Content::new(b"upstream", true)));
    match body {
        HttpObject::Content(content) => {
            assert_eq!(content.data, std::fs::read("test/replacement.html").unwrap());
            assert!(content.last);
        }
        other => panic!("expected content, got {}", other),
    }
}

#[test]
fn invalid_config_test() {
    let mut config = Config::default();
    config.side_channel.workers = 0;
    config.backend.host = "bad\nhost".to_string();
    match RetargetingSource::new(&config) {
        Err(ConfigError::Invalid(problems)) => assert_eq!(problems.len(), 2),
        Err(other) => panic!("expected validation failure, got {}", other),
        Ok(_) => panic!("expected validation failure"),
    }
}
