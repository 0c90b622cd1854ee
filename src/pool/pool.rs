use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use super::message::{Job, Message, Reply};
use super::worker::Worker;
use crate::error::NotifyError;
use crate::notify::Notifier;

/// Jobs that may wait for each worker before new ones are turned away
const QUEUE_PER_WORKER: usize = 8;

/// Notification workers
///
/// The threads dispatching requests never touch the side channel
/// themselves, a slow endpoint only ties up these workers. The job queue
/// is bounded, and a job whose waiter gave up before a worker reached it
/// is dropped unsent.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Mutex<mpsc::SyncSender<Message>>,
}

impl ThreadPool {
    pub fn new(size: usize, notifier: Arc<Notifier>) -> ThreadPool {
        assert!(size > 0);
        let (sender, receiver) = mpsc::sync_channel(size * QUEUE_PER_WORKER);
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            workers.push(Worker::new(id, Arc::clone(&receiver), Arc::clone(&notifier)));
        }

        ThreadPool {
            workers,
            sender: Mutex::new(sender),
        }
    }

    /// Queue a notification for `destination`
    ///
    /// Never blocks: a full queue or a closed pool is reported through
    /// the returned [`Pending`].
    pub fn execute(&self, destination: &str) -> Pending {
        let (reply, rx) = mpsc::channel();
        let claimed = Arc::new(AtomicBool::new(false));
        let job = Job {
            destination: destination.to_string(),
            reply: reply.clone(),
            claimed: Arc::clone(&claimed),
        };

        let sent = match self.sender.lock() {
            Ok(sender) => sender.try_send(Message::Notify(job)),
            Err(_) => Err(mpsc::TrySendError::Disconnected(Message::Terminate)),
        };
        match sent {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(_)) => {
                warn!("notification queue is full, drop the notification for {}", destination);
                let _ = reply.send(Err(NotifyError::Busy));
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                error!("send notification for {} failed: pool is closed", destination);
                let _ = reply.send(Err(NotifyError::PoolClosed));
            }
        }

        Pending { rx, claimed }
    }
}

// queued jobs still run before the workers see Terminate
impl Drop for ThreadPool {
    fn drop(&mut self) {
        info!("Sending terminate message to all workers.");

        if let Ok(sender) = self.sender.lock() {
            for _ in &self.workers {
                if let Err(e) = sender.send(Message::Terminate) {
                    error!("send message failed: {}", e);
                }
            }
        }

        info!("Shutting down all workers.");

        for worker in &mut self.workers {
            info!("Shutting down worker {}", worker.id);

            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    error!("thread join failed");
                };
            }
        }
    }
}

/// A queued notification whose reply may still be on its way
pub struct Pending {
    rx: mpsc::Receiver<Reply>,
    claimed: Arc<AtomicBool>,
}

impl Pending {
    /// Wait at most `timeout` for the worker's reply
    ///
    /// A job no worker has started by then is cancelled, so it is never
    /// sent after the caller moves on. A job already on the wire gets
    /// another `timeout`, which covers a notification that started at the
    /// last moment when `timeout` is the notifier's own bound.
    pub fn wait(self, timeout: Duration) -> Reply {
        match self.rx.recv_timeout(timeout) {
            Ok(reply) => return reply,
            Err(mpsc::RecvTimeoutError::Disconnected) => return Err(NotifyError::PoolClosed),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        if !self.claimed.swap(true, Ordering::SeqCst) {
            return Err(NotifyError::Timeout(timeout));
        }

        match self.rx.recv_timeout(timeout) {
            Ok(reply) => reply,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(NotifyError::Timeout(timeout * 2)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(NotifyError::PoolClosed),
        }
    }
}

#[cfg(test)]
use crate::notify::{closed_port, spawn_peer, test_config};

#[test]
fn pool_notify_test() {
    let command = Notifier::command("example.com:443");
    let (port, peer) = spawn_peer(command.len(), "ok\n");

    let pool = ThreadPool::new(2, Arc::new(Notifier::new(&test_config(port, 2000))));
    let reply = pool.execute("example.com:443").wait(Duration::from_secs(5));
    assert_eq!(reply.unwrap(), Some("ok".to_string()));
    assert_eq!(peer.join().unwrap(), command);
}

#[test]
fn pool_refused_test() {
    let pool = ThreadPool::new(1, Arc::new(Notifier::new(&test_config(closed_port(), 2000))));
    let reply = pool.execute("example.com:443").wait(Duration::from_secs(5));
    assert!(matches!(reply, Err(NotifyError::Connect { .. })));
}

#[test]
fn pool_running_job_test() {
    use std::io::{Read, Write};

    let command = Notifier::command("example.com:443");
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let expected = command.len();
    let peer = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = vec![0; expected];
        stream.read_exact(&mut buf).unwrap();
        std::thread::sleep(Duration::from_millis(400));
        stream.write_all(b"late\n").unwrap();
    });

    // the job is on the wire when the first wait runs out
    let pool = ThreadPool::new(1, Arc::new(Notifier::new(&test_config(port, 2000))));
    let reply = pool.execute("example.com:443").wait(Duration::from_millis(300));
    assert_eq!(reply.unwrap(), Some("late".to_string()));
    peer.join().unwrap();
}

#[test]
fn pool_saturated_test() {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = std::thread::spawn(move || {
        let mut received = Vec::new();
        for stream in listener.incoming() {
            let mut command = String::new();
            stream.unwrap().read_to_string(&mut command).unwrap();
            if command == "stop" {
                break;
            }
            received.push(command);
        }
        received
    });

    // one worker, held by a peer that never answers
    let pool = ThreadPool::new(1, Arc::new(Notifier::new(&test_config(port, 300))));
    let _first = pool.execute("first:443");
    let second = pool.execute("second:443").wait(Duration::from_millis(100));
    assert!(matches!(second, Err(NotifyError::Timeout(_))));
    drop(pool);

    let mut stop = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
    stop.write_all(b"stop").unwrap();
    drop(stop);

    // the abandoned job never reached the peer
    assert_eq!(peer.join().unwrap(), vec![Notifier::command("first:443")]);
}

#[test]
fn pool_queue_full_test() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let pool = ThreadPool::new(1, Arc::new(Notifier::new(&test_config(port, 100))));
    let mut pending: Vec<Pending> = (0..QUEUE_PER_WORKER + 1)
        .map(|i| pool.execute(&format!("host{}:443", i)))
        .collect();

    let overflow = pool.execute("overflow:443").wait(Duration::from_millis(100));
    assert!(matches!(overflow, Err(NotifyError::Busy)));

    pending.clear();
    drop(pool);
    drop(listener);
}
