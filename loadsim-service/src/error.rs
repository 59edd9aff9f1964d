//! Error types of the load pipeline.
//!
//! Only [`PlanError`] is fatal for a run. All other errors are local to one batch or one request
//! and end up in a report or a recorded outcome instead of failing the surrounding operation.

use thiserror::Error;

/// The run configuration cannot produce a plan.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Subject identifiers are drawn from `[0, user_count)`, which is empty.
    #[error("user count must be greater than zero")]
    EmptyUserUniverse,
    /// There are no endpoint templates to spread the requests over.
    #[error("at least one endpoint template is required")]
    NoEndpoints,
    /// The run asks for more requests than a single run may issue.
    #[error("request count {requested} exceeds the limit of {limit}")]
    TooManyRequests {
        /// The requested number of calls.
        requested: u64,
        /// The configured maximum.
        limit: u64,
    },
}

/// Errors of the [`Queue`](crate::queue::Queue) abstraction.
#[derive(Debug, Error)]
pub enum QueueError {
    /// More entries than the queue accepts in a single call.
    #[error("batch of {0} entries exceeds the maximum of {max}", max = crate::batch::MAX_BATCH_SIZE)]
    BatchTooLarge(usize),
    /// A batch without entries.
    #[error("batch contains no entries")]
    EmptyBatch,
    /// Two entries of the same batch share an identifier.
    #[error("duplicate entry id `{0}` in batch")]
    DuplicateId(String),
    /// The remote queue answered with an unexpected status.
    #[error("queue responded with status {status}: {message}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, if any.
        message: String,
    },
    /// The remote queue could not be reached or its response could not be read.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// What was attempted.
        context: String,
        /// The underlying error.
        #[source]
        cause: reqwest::Error,
    },
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// A single entry the queue refused to accept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedEntry {
    /// The entry identifier within its batch.
    pub id: String,
    /// Reason given by the queue.
    pub message: String,
}

/// One batch could not be handed to the queue.
///
/// These errors are isolated per batch: they are collected in the
/// [`EnqueueReport`](crate::enqueue::EnqueueReport) and never cancel or retry other batches.
#[derive(Debug, Error)]
pub enum BatchSubmitError {
    /// A request of the batch could not be serialized into a message body.
    #[error("failed to serialize request {entry} of batch {batch}")]
    Serialize {
        /// Index of the batch within the run.
        batch: usize,
        /// Index of the request within the batch.
        entry: usize,
        /// The underlying error.
        #[source]
        cause: serde_json::Error,
    },
    /// The queue call itself failed.
    #[error("failed to submit batch {batch}")]
    Queue {
        /// Index of the batch within the run.
        batch: usize,
        /// The underlying error.
        #[source]
        cause: QueueError,
    },
    /// The queue accepted the call but refused some of its entries.
    #[error("queue rejected {} entries of batch {batch}", .rejected.len())]
    Rejected {
        /// Index of the batch within the run.
        batch: usize,
        /// The refused entries.
        rejected: Vec<RejectedEntry>,
    },
}

impl BatchSubmitError {
    /// Returns the index of the batch this error belongs to.
    pub fn batch(&self) -> usize {
        match self {
            BatchSubmitError::Serialize { batch, .. }
            | BatchSubmitError::Queue { batch, .. }
            | BatchSubmitError::Rejected { batch, .. } => *batch,
        }
    }
}

/// An outbound call did not produce an HTTP response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// No connection could be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The call could not be built, e.g. because of an invalid method, URL or header.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Any other failure before or while reading the response.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// The metrics sink failed to publish.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing the metrics document failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding the metrics document failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}
