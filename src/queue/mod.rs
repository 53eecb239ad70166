pub mod order_queue;

pub use order_queue::{OrderQueue, QueueMessage};
