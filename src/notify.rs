//! Side-channel notification
//!
//! Before a CONNECT request is redirected, the control endpoint is told
//! where the client actually wanted to go. One short-lived TCP connection
//! per notification: the navigation command goes out, one line comes back.

use std::io::{BufRead, BufReader, Write};
use std::io::{Error as IoError, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::{self, Target};
use crate::error::NotifyError;

/// Blocking client for the side-channel endpoint
#[derive(Debug, Clone)]
pub struct Notifier {
    target: Target,
    connect_timeout: Duration,
    io_timeout: Duration,
    terminator: String,
}

impl Notifier {
    pub fn new(cfg: &config::SideChannel) -> Notifier {
        Notifier {
            target: cfg.target(),
            connect_timeout: cfg.connect_timeout(),
            io_timeout: cfg.io_timeout(),
            terminator: cfg.terminator.clone(),
        }
    }

    /// The navigation command sent for `destination`
    pub fn command(destination: &str) -> String {
        format!("window.location=\"http://{}\"", destination)
    }

    /// Send the command for `destination` and wait for one line back
    ///
    /// Takes at most `connect_timeout + io_timeout` once the name is
    /// resolved. `Ok(None)` means the peer closed the connection without
    /// answering.
    pub fn notify(&self, destination: &str) -> Result<Option<String>, NotifyError> {
        let stream = self.connect()?;
        let io_error = |source: IoError| NotifyError::Connect {
            target: self.target.authority(),
            source,
        };
        stream.set_write_timeout(Some(self.io_timeout)).map_err(io_error)?;

        let mut message = Self::command(destination);
        message.push_str(&self.terminator);
        debug!("side channel {} <- {}", self.target, message.trim_end());

        let started = Instant::now();
        let mut writer = &stream;
        writer
            .write_all(message.as_bytes())
            .map_err(NotifyError::Write)?;
        writer.flush().map_err(NotifyError::Write)?;

        // the read gets what the write left of the io budget
        let left = remaining(self.io_timeout, started)
            .ok_or_else(|| NotifyError::Read(timed_out("io budget spent on the write")))?;
        stream.set_read_timeout(Some(left)).map_err(io_error)?;

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                info!("side channel {} closed without acknowledgment", self.target);
                Ok(None)
            }
            Ok(_) => Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string())),
            Err(err) => Err(NotifyError::Read(err)),
        }
    }

    // try resolved addresses in turn, all of them within one connect budget
    fn connect(&self) -> Result<TcpStream, NotifyError> {
        let authority = self.target.authority();
        let addrs = (self.target.host.as_str(), self.target.port)
            .to_socket_addrs()
            .map_err(|source| NotifyError::Resolve {
                target: authority.clone(),
                source,
            })?;

        let started = Instant::now();
        let mut last_err = None;
        for addr in addrs {
            let left = match remaining(self.connect_timeout, started) {
                Some(left) => left,
                None => {
                    last_err = Some(timed_out("connect budget spent"));
                    break;
                }
            };
            match TcpStream::connect_timeout(&addr, left) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!("connect to side channel {} failed: {}, try another", addr, err);
                    last_err = Some(err);
                }
            }
        }

        Err(NotifyError::Connect {
            target: authority,
            source: last_err
                .unwrap_or_else(|| IoError::new(ErrorKind::NotFound, "no address resolved")),
        })
    }
}

/// What is left of `budget` since `started`, `None` once it is spent
fn remaining(budget: Duration, started: Instant) -> Option<Duration> {
    budget
        .checked_sub(started.elapsed())
        .filter(|left| !left.is_zero())
}

fn timed_out(what: &str) -> IoError {
    IoError::new(ErrorKind::TimedOut, what)
}

#[cfg(test)]
pub(crate) fn test_config(port: u16, io_timeout_ms: u64) -> config::SideChannel {
    config::SideChannel {
        host: "127.0.0.1".to_string(),
        port,
        connect_timeout_ms: 500,
        io_timeout_ms,
        ..config::SideChannel::default()
    }
}

/// A port nothing listens on
#[cfg(test)]
pub(crate) fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Peer that reads `expected` bytes, replies with `reply` and hands the
/// received command back through the join handle
#[cfg(test)]
pub(crate) fn spawn_peer(
    expected: usize,
    reply: &'static str,
) -> (u16, std::thread::JoinHandle<String>) {
    use std::io::Read;

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = vec![0; expected];
        stream.read_exact(&mut buf).unwrap();
        stream.write_all(reply.as_bytes()).unwrap();
        String::from_utf8(buf).unwrap()
    });
    (port, handle)
}

#[test]
fn command_test() {
    assert_eq!(
        Notifier::command("example.com:443"),
        "window.location=\"http://example.com:443\""
    );
}

#[test]
fn notify_test() {
    let command = Notifier::command("example.com:443");
    let (port, peer) = spawn_peer(command.len(), "loaded\r\n");

    let notifier = Notifier::new(&test_config(port, 2000));
    let ack = notifier.notify("example.com:443").unwrap();
    assert_eq!(ack, Some("loaded".to_string()));
    assert_eq!(peer.join().unwrap(), "window.location=\"http://example.com:443\"");
}

#[test]
fn notify_with_terminator_test() {
    let (port, peer) = spawn_peer(Notifier::command("a:1").len() + 1, "");

    let mut cfg = test_config(port, 2000);
    cfg.terminator = "\n".to_string();
    let ack = Notifier::new(&cfg).notify("a:1").unwrap();

    // the peer hung up without a reply
    assert_eq!(ack, None);
    assert_eq!(peer.join().unwrap(), "window.location=\"http://a:1\"\n");
}

#[test]
fn notify_refused_test() {
    let notifier = Notifier::new(&test_config(closed_port(), 2000));
    match notifier.notify("example.com:443") {
        Err(NotifyError::Connect { target, .. }) => assert!(target.starts_with("127.0.0.1:")),
        other => panic!("expected connect failure, got {:?}", other),
    }
}

#[test]
fn notify_silent_peer_test() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        std::thread::sleep(Duration::from_millis(800));
        drop(stream);
    });

    let notifier = Notifier::new(&test_config(port, 200));
    let err = notifier.notify("example.com:443").unwrap_err();
    assert!(err.is_timeout(), "unexpected error {:?}", err);
    peer.join().unwrap();
}

#[test]
fn remaining_budget_test() {
    let started = Instant::now();
    let left = remaining(Duration::from_secs(5), started).unwrap();
    assert!(left <= Duration::from_secs(5));
    assert!(remaining(Duration::from_millis(0), started).is_none());

    let long_ago = Instant::now() - Duration::from_millis(50);
    assert!(remaining(Duration::from_millis(10), long_ago).is_none());
}

#[test]
fn notify_within_deadline_test() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // accepted by the backlog, never answered
    let cfg = test_config(port, 300);
    let started = Instant::now();
    let err = Notifier::new(&cfg).notify("example.com:443").unwrap_err();
    assert!(err.is_timeout(), "unexpected error {:?}", err);
    assert!(started.elapsed() < cfg.deadline() + Duration::from_millis(200));
    drop(listener);
}
