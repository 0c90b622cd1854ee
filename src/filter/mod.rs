use crate::exchange::{HttpObject, Request, Response};

mod header;
mod response;
mod retarget;
mod uri;

pub use header::HeaderRewriter;
pub use response::{Replacement, ResponseRewriter};
pub use retarget::{Phase, RetargetingFilter, RetargetingSource};
pub use uri::Retargeter;

/// Filter status
///
/// Forward the fragment, or answer the client right away
#[derive(Debug, PartialEq)]
pub enum FilterStatus {
    Forward,
    Respond(Response),
}

/// Hooks the proxy engine calls for one request/response exchange
///
/// Calls for one exchange arrive in order: the request head, its content,
/// then the response head and its content. Every hook defaults to
/// forwarding the fragment untouched.
pub trait HttpFilters: Send {
    /// Client to proxy, the fragment may be rewritten in place
    fn on_outbound_request_fragment(&mut self, _object: &mut HttpObject) -> FilterStatus {
        FilterStatus::Forward
    }

    /// Proxy to server, after the outbound hook has run
    fn on_upstream_request_fragment(&mut self, _object: &HttpObject) -> FilterStatus {
        FilterStatus::Forward
    }

    /// Server to proxy, the returned fragment is what the client gets
    fn on_inbound_response_fragment(&mut self, object: HttpObject) -> HttpObject {
        object
    }
}

/// Hands out one filter per client request
pub trait FiltersSource: Send + Sync {
    fn filter_request(&self, original: &Request) -> Box<dyn HttpFilters>;
}

#[test]
fn default_hooks_test() {
    struct Noop;
    impl HttpFilters for Noop {}

    let mut filter = Noop;
    let mut head = HttpObject::Request(Request::new(http::Method::GET, "http://anyhost/"));
    let before = head.clone();

    assert_eq!(filter.on_outbound_request_fragment(&mut head), FilterStatus::Forward);
    assert_eq!(head, before);
    assert_eq!(filter.on_upstream_request_fragment(&head), FilterStatus::Forward);

    let res = HttpObject::Response(Response::default());
    assert_eq!(filter.on_inbound_response_fragment(res.clone()), res);
}
