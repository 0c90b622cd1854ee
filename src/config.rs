//! config.rs handles the configuration file: reading it, validating it and
//! generating the default one

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::fs::{self, File};
use std::path::Path;
use std::time::Duration;

use http::header::HeaderValue;
use serde::{Deserialize, Serialize};
use serde_json::{self, Result as JsonResult};
use serde_yaml;

use crate::error::ConfigError;

/// Placeholders rendered into the bootstrap path
const HOST_PLACEHOLDER: &str = "{host}";
const PORT_PLACEHOLDER: &str = "{port}";

/// Configuration file content
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub side_channel: SideChannel,
    pub response: ResponseOverride,
    pub log: Log,
}

/// A fixed host:port pair
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: &str, port: u16) -> Target {
        Target {
            host: host.to_string(),
            port,
        }
    }

    /// `host:port`, the form used for the Host header and CONNECT targets
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The backend every request is redirected to
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Backend {
    pub host: String,
    pub port: u16,
    /// Path and query used instead of an empty or root path,
    /// `{host}` and `{port}` are replaced with the backend address
    pub bootstrap: String,
    /// Keep the original query string on non-root paths
    pub preserve_query: bool,
}

impl Default for Backend {
    fn default() -> Self {
        Backend {
            host: "192.168.56.1".to_string(),
            port: 6080,
            bootstrap: "/vnc_lite.html?host={host}&port={port}".to_string(),
            preserve_query: false,
        }
    }
}

impl Backend {
    pub fn target(&self) -> Target {
        Target::new(&self.host, self.port)
    }

    /// The bootstrap path with the backend address filled in
    pub fn bootstrap_path(&self) -> String {
        self.bootstrap
            .replace(HOST_PLACEHOLDER, &self.host)
            .replace(PORT_PLACEHOLDER, &self.port.to_string())
    }
}

/// Control endpoint told about the original destination of CONNECT requests
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SideChannel {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Read and write timeout once connected
    pub io_timeout_ms: u64,
    /// Bytes written after the navigation command
    pub terminator: String,
    /// Block the CONNECT head until the acknowledgment (or a timeout) arrives
    pub wait_for_ack: bool,
    /// Number of notification worker threads
    pub workers: usize,
}

impl Default for SideChannel {
    fn default() -> Self {
        SideChannel {
            host: "192.168.56.1".to_string(),
            port: 32000,
            connect_timeout_ms: 3000,
            io_timeout_ms: 3000,
            terminator: String::new(),
            wait_for_ack: true,
            workers: 2,
        }
    }
}

impl SideChannel {
    pub fn target(&self) -> Target {
        Target::new(&self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Upper bound for one notification once a worker has picked it up
    ///
    /// Every resolved address shares the connect budget, the write and
    /// the acknowledgment read share the io budget.
    pub fn deadline(&self) -> Duration {
        self.connect_timeout() + self.io_timeout()
    }
}

/// Response rewriting, both options are off by default
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct ResponseOverride {
    /// Turn every response head into a 302 pointing here
    pub redirect: Option<String>,
    /// Serve this file's content instead of the upstream body
    pub body_file: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Log {
    pub file: String,
    pub level: String,
    pub console: bool,
    /// Log decoded request and response bodies
    pub dump_bodies: bool,
}

impl Default for Log {
    fn default() -> Self {
        Log {
            file: "retarget.log".to_string(),
            level: "info".to_string(),
            console: false,
            dump_bodies: false,
        }
    }
}

impl Config {
    /// Read and validate the configuration file
    pub fn parse<P: AsRef<Path>>(filepath: P) -> Result<Config, ConfigError> {
        let f = File::open(filepath)?;
        let config: Config = serde_yaml::from_reader(f)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration to `filepath`
    pub fn generate_default<P: AsRef<Path>>(filepath: P) -> Result<Config, ConfigError> {
        let default_config = Config::default();

        let str = serde_yaml::to_string(&default_config)?;
        fs::write(filepath, str)?;

        Ok(default_config)
    }

    pub fn to_json(&self) -> JsonResult<String> {
        serde_json::to_string(self)
    }

    /// Semantic checks, every problem is reported at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        let targets = vec![
            ("backend", self.backend.target()),
            ("side_channel", self.side_channel.target()),
        ];
        for (name, target) in targets {
            if target.host.trim().is_empty() {
                problems.push(format!("{}.host is empty", name));
            }
            if target.port == 0 {
                problems.push(format!("{}.port must not be 0", name));
            }
        }

        if HeaderValue::from_str(&self.backend.target().authority()).is_err() {
            problems.push("backend address is not a valid Host header".to_string());
        }
        if let Some(location) = &self.response.redirect {
            if HeaderValue::from_str(location).is_err() {
                problems.push("response.redirect is not a valid Location header".to_string());
            }
        }
        if !self.backend.bootstrap.starts_with('/') {
            problems.push("backend.bootstrap must start with '/'".to_string());
        }
        if self.side_channel.connect_timeout_ms == 0 {
            problems.push("side_channel.connect_timeout_ms must be positive".to_string());
        }
        if self.side_channel.io_timeout_ms == 0 {
            problems.push("side_channel.io_timeout_ms must be positive".to_string());
        }
        if self.side_channel.workers == 0 {
            problems.push("side_channel.workers must be at least 1".to_string());
        }
        if self.log.level.parse::<log::LevelFilter>().is_err() {
            problems.push(format!("log.level `{}` is not a level", self.log.level));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

#[test]
fn parse_config_test() {
    assert!(Config::parse("test/not_exist.yml").is_err());

    let config = Config::parse("test/config.yml");
    println!("{:?}", &config);
    assert!(config.is_ok());

    let config = config.unwrap();
    assert_eq!(config.backend.target().authority(), "10.0.0.5:6080");
    assert_eq!(
        config.backend.bootstrap_path(),
        "/vnc_lite.html?host=10.0.0.5&port=6080"
    );
    assert!(config.backend.preserve_query);
    assert_eq!(config.side_channel.target().authority(), "10.0.0.5:32000");
    assert_eq!(config.side_channel.connect_timeout(), Duration::from_millis(500));
    assert_eq!(config.side_channel.deadline(), Duration::from_millis(1500));
    assert_eq!(config.side_channel.terminator, "\n");
    assert!(!config.side_channel.wait_for_ack);
    // missing sections fall back to defaults
    assert_eq!(config.response, ResponseOverride::default());
    assert_eq!(config.log.level, "debug");
}

#[test]
fn generate_default_test() {
    let path = std::env::temp_dir().join("retarget-default-config.yml");
    let generated = Config::generate_default(&path).unwrap();
    let parsed = Config::parse(&path).unwrap();
    assert_eq!(generated, parsed);
    assert_eq!(parsed.backend.target().authority(), "192.168.56.1:6080");
    assert_eq!(parsed.side_channel.target().authority(), "192.168.56.1:32000");
    assert!(parsed.to_json().unwrap().contains("\"bootstrap\""));
    let _ = fs::remove_file(path);
}

#[test]
fn validate_config_test() {
    let config = Config::parse("test/invalid.yml");
    match config {
        Err(ConfigError::Invalid(problems)) => {
            assert_eq!(problems.len(), 4);
            assert!(problems.iter().any(|p| p.contains("backend.port")));
            assert!(problems.iter().any(|p| p.contains("bootstrap")));
            assert!(problems.iter().any(|p| p.contains("workers")));
            assert!(problems.iter().any(|p| p.contains("log.level")));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
fn bootstrap_follows_backend_test() {
    let mut backend = Backend::default();
    assert_eq!(
        backend.bootstrap_path(),
        "/vnc_lite.html?host=192.168.56.1&port=6080"
    );
    backend.host = "gateway.local".to_string();
    backend.port = 443;
    assert_eq!(
        backend.bootstrap_path(),
        "/vnc_lite.html?host=gateway.local&port=443"
    );
}

#[test]
fn validate_header_values_test() {
    let mut config = Config::default();
    assert!(config.validate().is_ok());

    config.backend.host = "bad\nhost".to_string();
    config.response.redirect = Some("http://x/\r\n".to_string());
    match config.validate() {
        Err(ConfigError::Invalid(problems)) => {
            assert_eq!(problems.len(), 2);
            assert!(problems.iter().any(|p| p.contains("Host header")));
            assert!(problems.iter().any(|p| p.contains("response.redirect")));
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}
