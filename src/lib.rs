//! Retargeting filter for an HTTP forward proxy
//!
//! Every request that passes through the proxy is redirected to one fixed
//! backend. Plain requests keep their scheme and path against the backend,
//! root requests land on the backend's bootstrap page, and CONNECT tunnels
//! are pointed at the backend after a side-channel endpoint has been told
//! where the client was really going.
//!
//! The proxy engine owns sockets and parsing. It asks a [`FiltersSource`]
//! for one [`HttpFilters`] per client request and feeds it the message
//! fragments of that exchange.

mod log;

pub mod config;
pub mod error;
pub mod exchange;
pub mod filter;
pub mod notify;
pub mod pool;

pub use crate::log::init as init_log;
pub use config::Config;
pub use filter::{FilterStatus, FiltersSource, HttpFilters, RetargetingFilter, RetargetingSource};
