//! Error types
//!
//! Only configuration errors ever leave the crate. Notification errors are
//! logged by the filter and never reach the proxy engine.

use std::io;

use thiserror::Error;

/// Errors raised while loading the configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can not access config file: {0}")]
    Io(#[from] io::Error),

    #[error("deserialize config file failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Errors raised while talking to the side-channel endpoint
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("can not resolve side channel {target}: {source}")]
    Resolve {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("connect to side channel {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("write to side channel failed: {0}")]
    Write(#[source] io::Error),

    #[error("read from side channel failed: {0}")]
    Read(#[source] io::Error),

    #[error("no acknowledgment within {0:?}")]
    Timeout(std::time::Duration),

    #[error("notification queue is full")]
    Busy,

    #[error("notification pool is shut down")]
    PoolClosed,
}

impl NotifyError {
    /// Whether the endpoint was too slow rather than unreachable
    pub fn is_timeout(&self) -> bool {
        match self {
            NotifyError::Timeout(_) => true,
            NotifyError::Connect { source, .. } | NotifyError::Read(source) | NotifyError::Write(source) => {
                matches!(
                    source.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                )
            }
            _ => false,
        }
    }
}

/// Reasons an intercepted URI can not be retargeted
#[derive(Debug, Error)]
pub enum UriError {
    #[error("malformed uri: {0}")]
    Malformed(#[from] url::ParseError),

    #[error("uri has no authority to replace")]
    NotHierarchical,
}
