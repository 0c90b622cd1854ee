//! Response rewriting
//!
//! Off unless the `response` section asks for it: responses can be turned
//! into a redirect, or have their body replaced with a local file.

use std::fs;
use std::path::PathBuf;

use http::header::{HeaderValue, CONTENT_LENGTH, LOCATION, TRANSFER_ENCODING};
use http::StatusCode;
use log::{error, info};

use crate::config::ResponseOverride;
use crate::exchange::{Content, Response};

#[derive(Debug, Clone, Default)]
pub struct ResponseRewriter {
    redirect: Option<HeaderValue>,
    body_file: Option<PathBuf>,
}

impl ResponseRewriter {
    pub fn new(cfg: &ResponseOverride) -> ResponseRewriter {
        let redirect = cfg.redirect.as_ref().and_then(|location| {
            match HeaderValue::from_str(location) {
                Ok(value) => Some(value),
                Err(err) => {
                    error!("redirect location {:?} is not a header value: {}, ignore it", location, err);
                    None
                }
            }
        });

        ResponseRewriter {
            redirect,
            body_file: cfg.body_file.as_ref().map(PathBuf::from),
        }
    }

    pub fn enabled(&self) -> bool {
        self.redirect.is_some() || self.body_file.is_some()
    }

    /// Rewrite a response head
    ///
    /// Returns the body that replaces the upstream content, if any.
    pub fn rewrite_head(&self, res: &mut Response) -> Option<Replacement> {
        if let Some(location) = &self.redirect {
            info!("redirect response {} to {:?}", res, location);
            res.status = StatusCode::FOUND;
            res.headers.insert(LOCATION, location.clone());
        }

        let path = self.body_file.as_ref()?;
        match fs::read(path) {
            Ok(body) => {
                info!("serve {} ({} bytes) instead of the upstream body", path.display(), body.len());
                res.headers.remove(TRANSFER_ENCODING);
                res.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
                Some(Replacement { body: Some(body) })
            }
            Err(err) => {
                error!("can not read {}: {}, forward the upstream body", path.display(), err);
                None
            }
        }
    }
}

/// Replacement body for one response
#[derive(Debug)]
pub struct Replacement {
    body: Option<Vec<u8>>,
}

impl Replacement {
    /// The first chunk carries the whole replacement, later chunks are emptied
    pub fn apply(&mut self, content: &mut Content) {
        match self.body.take() {
            Some(body) => content.data = body,
            None => content.data.clear(),
        }
    }
}

#[test]
fn disabled_test() {
    let rewriter = ResponseRewriter::new(&ResponseOverride::default());
    assert!(!rewriter.enabled());

    let mut res = Response::default();
    res.headers.insert(CONTENT_LENGTH, HeaderValue::from_static("5"));
    let before = res.clone();
    assert!(rewriter.rewrite_head(&mut res).is_none());
    assert_eq!(res, before);
}

#[test]
fn redirect_test() {
    let rewriter = ResponseRewriter::new(&ResponseOverride {
        redirect: Some("http://localhost:9082/login.jsp".to_string()),
        body_file: None,
    });
    assert!(rewriter.enabled());

    let mut res = Response::default();
    res.headers.append(LOCATION, HeaderValue::from_static("http://elsewhere/"));
    res.headers.append(LOCATION, HeaderValue::from_static("http://elsewhere/again"));
    assert!(rewriter.rewrite_head(&mut res).is_none());
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(
        res.headers.get_all(LOCATION).iter().collect::<Vec<_>>(),
        vec!["http://localhost:9082/login.jsp"]
    );
}

#[test]
fn body_file_test() {
    let rewriter = ResponseRewriter::new(&ResponseOverride {
        redirect: None,
        body_file: Some("test/replacement.html".to_string()),
    });
    let expected = fs::read("test/replacement.html").unwrap();

    let mut res = Response::default();
    res.headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    let mut replacement = rewriter.rewrite_head(&mut res).unwrap();
    assert!(!res.headers.contains_key(TRANSFER_ENCODING));
    assert_eq!(
        res.headers.get(CONTENT_LENGTH).unwrap(),
        expected.len().to_string().as_str()
    );

    let mut first = Content::new(b"upstream", false);
    let mut second = Content::new(b"more upstream", true);
    replacement.apply(&mut first);
    replacement.apply(&mut second);
    assert_eq!(first.data, expected);
    assert!(second.data.is_empty());
    assert!(second.last);
}

#[test]
fn body_file_missing_test() {
    let rewriter = ResponseRewriter::new(&ResponseOverride {
        redirect: None,
        body_file: Some("test/not_exist.html".to_string()),
    });
    let mut res = Response::default();
    assert!(rewriter.rewrite_head(&mut res).is_none());
    assert_eq!(res, Response::default());
}

#[test]
fn invalid_redirect_test() {
    let rewriter = ResponseRewriter::new(&ResponseOverride {
        redirect: Some("http://bad\nlocation/".to_string()),
        body_file: None,
    });
    assert!(!rewriter.enabled());
}
