pub mod blob;
pub mod error;
pub mod memory;
pub mod queue;

pub use blob::{BlobStore, MemoryBlobStore};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use queue::{PayloadRef, QueueHealth, QueueItem, QueueMessage, TaskQueue};
