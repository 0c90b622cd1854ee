mod message;
mod pool;
mod worker;

pub use message::Reply;
pub use pool::{Pending, ThreadPool};
