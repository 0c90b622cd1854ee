use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::error::NotifyError;

/// Outcome of one notification: the acknowledgment line, if any
pub type Reply = Result<Option<String>, NotifyError>;

/// Notification job
pub struct Job {
    /// Original CONNECT target, `host:port`
    pub destination: String,
    pub reply: mpsc::Sender<Reply>,
    /// Set by whichever side moves first: the worker starting the job, or
    /// the waiter giving up on it
    pub claimed: Arc<AtomicBool>,
}

impl Job {
    /// False when the waiter already gave up, the job must then be dropped
    pub fn start(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }
}

pub enum Message {
    Notify(Job),
    /// One per worker, sent when the pool is dropped
    Terminate,
}
