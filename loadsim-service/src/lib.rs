//! The load generation pipeline.
//!
//! A run starts at the [`LoadTrigger`](trigger::LoadTrigger), which builds a
//! [plan](plan::build_plan), splits it into [batches](batch::into_batches) and submits them
//! through the [`BatchEnqueuer`](enqueue::BatchEnqueuer) to a [`Queue`](queue::Queue). The
//! [`DispatchWorker`](dispatch::DispatchWorker) later consumes the queued requests, issues them
//! through a [`Transport`](transport::Transport) and publishes per-endpoint measurements through
//! a [`MetricsRecorder`](metrics::MetricsRecorder).
//!
//! Every stage settles all of its concurrent work before it reports. A single failing batch or
//! call is recorded and never aborts its siblings.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod batch;
pub mod dispatch;
pub mod enqueue;
pub mod error;
pub mod metrics;
pub mod plan;
pub mod queue;
pub mod transport;
pub mod trigger;

pub use dispatch::{DispatchOutcome, DispatchWorker, InvocationReport, OutcomeKind};
pub use enqueue::{BatchEnqueuer, EnqueueReport};
pub use metrics::{MetricsRecorder, MetricsSink, SharedSink};
pub use plan::EndpointTemplate;
pub use queue::{Queue, SharedQueue};
pub use transport::{SharedTransport, Transport};
pub use trigger::LoadTrigger;
