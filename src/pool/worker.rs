use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use log::{debug, info, warn};

use super::message::Message;
use crate::notify::Notifier;

pub struct Worker {
    pub id: usize,
    pub thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub fn new(
        id: usize,
        receiver: Arc<Mutex<mpsc::Receiver<Message>>>,
        notifier: Arc<Notifier>,
    ) -> Worker {
        let thread = thread::spawn(move || loop {
            let message = {
                let rx = match receiver.lock() {
                    Ok(rx) => rx,
                    Err(_) => {
                        warn!("worker {} found the job queue poisoned", id);
                        break;
                    }
                };
                rx.recv()
            };

            match message {
                Ok(Message::Notify(job)) => {
                    if !job.start() {
                        debug!(
                            "worker {}: {} was already forwarded, skip its notification",
                            id, job.destination
                        );
                        continue;
                    }

                    let reply = notifier.notify(&job.destination);
                    match &reply {
                        Ok(Some(ack)) => info!(
                            "worker {}: side channel acknowledged {}: {}",
                            id, job.destination, ack
                        ),
                        Ok(None) => info!(
                            "worker {}: side channel notified of {}, no acknowledgment",
                            id, job.destination
                        ),
                        Err(err) => warn!(
                            "worker {}: notify side channel of {} failed: {}",
                            id, job.destination, err
                        ),
                    }
                    // nobody waits in fire-and-forget mode
                    let _ = job.reply.send(reply);
                }
                Ok(Message::Terminate) | Err(_) => {
                    info!("worker {} terminate ...", id);
                    break;
                }
            }
        });

        Worker {
            id,
            thread: Some(thread),
        }
    }
}
