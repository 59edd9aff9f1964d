//! Abstraction over the distributed queue between the trigger and the dispatch workers.
//!
//! The queue is an external at-least-once delivery service. This module only models the three
//! operations the pipeline needs: sending a batch, receiving messages and acknowledging them.
//! Redelivery, visibility timeouts and durability are the queue's business.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{QueueResult, RejectedEntry};

mod http;
mod in_memory;

pub use self::http::HttpQueue;
pub use self::in_memory::InMemoryQueue;

/// A type-erased, shareable [`Queue`] instance.
pub type SharedQueue = Arc<dyn Queue>;

/// One message to submit as part of a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    /// Identifier of the entry, unique within its batch.
    pub id: String,
    /// The serialized message body.
    pub body: String,
}

/// Handle used to acknowledge a received message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

/// A message delivered by the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueMessage {
    /// Identifier assigned by the queue.
    pub message_id: String,
    /// Handle to acknowledge this delivery.
    pub receipt: ReceiptHandle,
    /// The serialized message body.
    pub body: String,
}

/// Result of a batch submission that reached the queue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendBatchResponse {
    /// Entries the queue refused. Empty if the whole batch was accepted.
    pub rejected: Vec<RejectedEntry>,
}

/// The operations the pipeline performs against the queue.
///
/// Implementations must be safe to share across tasks: the enqueuer submits all batches of a run
/// concurrently through one instance.
#[async_trait::async_trait]
pub trait Queue: Debug + Send + Sync + 'static {
    /// The queue name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Submits up to [`MAX_BATCH_SIZE`](crate::batch::MAX_BATCH_SIZE) entries in one call.
    async fn send_batch(&self, entries: Vec<QueueEntry>) -> QueueResult<SendBatchResponse>;

    /// Receives up to `max` messages, waiting at most `wait` for the first one to arrive.
    ///
    /// Returns an empty list if no message arrived in time.
    async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>>;

    /// Acknowledges fully handled messages so they are not delivered again.
    async fn acknowledge(&self, receipts: Vec<ReceiptHandle>) -> QueueResult<()>;
}
