//! The queue-triggered consumer that fires the planned calls.
//!
//! One invocation of the [`DispatchWorker`] handles the set of messages the queue delivered
//! together. Every message becomes its own task, and the invocation waits for all of them to
//! settle before it flushes metrics once. No task can cancel, delay or swallow the outcome of a
//! sibling: each message yields exactly one [`DispatchOutcome`], including messages that cannot
//! be decoded and tasks that panic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{self, BoxFuture, FutureExt};
use loadsim_types::{MetricKind, SimulatedRequest};
use tokio::task::JoinHandle;

use crate::metrics::{MetricsRecorder, SharedSink};
use crate::queue::QueueMessage;
use crate::transport::{OutboundCall, SharedTransport};

/// Metric name under which messages with an undecodable body are counted.
pub const UNPARSEABLE_METRIC: &str = "unparseable-message";

/// Classification of one dispatched request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutcomeKind {
    /// The call completed with a status below 400.
    Success {
        /// The response status.
        status: u16,
    },
    /// The call completed with a status of 400 or above.
    HttpFailure {
        /// The response status.
        status: u16,
    },
    /// The call did not produce a response.
    TransportError {
        /// Description of what went wrong.
        reason: String,
    },
}

impl OutcomeKind {
    /// Classifies a completed call by its status code.
    pub fn from_status(status: u16) -> Self {
        if status < 400 {
            OutcomeKind::Success { status }
        } else {
            OutcomeKind::HttpFailure { status }
        }
    }

    /// Returns `true` for [`OutcomeKind::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeKind::Success { .. })
    }

    fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success { .. } => "success",
            OutcomeKind::HttpFailure { .. } => "http_failure",
            OutcomeKind::TransportError { .. } => "transport_error",
        }
    }
}

/// Result of attempting one request.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchOutcome {
    /// Logical endpoint label of the request.
    pub metric_name: String,
    /// Time spent on the call.
    pub duration: Duration,
    /// How the call ended.
    pub kind: OutcomeKind,
}

impl DispatchOutcome {
    /// Returns the duration in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    fn record(&self, recorder: &MetricsRecorder) {
        let name = self.metric_name.as_str();
        recorder.record_duration(MetricKind::NetworkLatency, name, self.duration);
        recorder.record(MetricKind::TotalCalls, name, 1.0);
        if self.kind.is_success() {
            recorder.record(MetricKind::Successes, name, 1.0);
        } else {
            recorder.record(MetricKind::Failures, name, 1.0);
        }
    }
}

/// Summary of one invocation.
#[derive(Debug, Default)]
pub struct InvocationReport {
    /// One outcome per delivered message, in delivery order.
    pub outcomes: Vec<DispatchOutcome>,
    /// Number of measurements handed to the sink.
    pub flushed: usize,
}

impl InvocationReport {
    /// Returns the number of successful calls.
    pub fn successes(&self) -> usize {
        self.count(|kind| kind.is_success())
    }

    /// Returns the number of calls that completed with an error status.
    pub fn http_failures(&self) -> usize {
        self.count(|kind| matches!(kind, OutcomeKind::HttpFailure { .. }))
    }

    /// Returns the number of calls that did not complete.
    pub fn transport_errors(&self) -> usize {
        self.count(|kind| matches!(kind, OutcomeKind::TransportError { .. }))
    }

    fn count(&self, predicate: impl Fn(&OutcomeKind) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.kind)).count()
    }
}

/// Handles queue deliveries by calling the system under test and recording metrics.
///
/// The transport and the sink are shared across invocations; the metric accumulator is not.
#[derive(Clone, Debug)]
pub struct DispatchWorker {
    transport: SharedTransport,
    sink: SharedSink,
}

impl DispatchWorker {
    /// Creates a worker issuing calls through `transport` and publishing to `sink`.
    pub fn new(transport: SharedTransport, sink: SharedSink) -> Self {
        Self { transport, sink }
    }

    /// Handles one invocation.
    ///
    /// Returns after every message has settled and metrics were flushed. This never fails:
    /// failed calls are recorded as outcomes and a failing sink is logged.
    pub async fn handle(&self, messages: &[QueueMessage]) -> InvocationReport {
        let start = Instant::now();
        let recorder = MetricsRecorder::new();

        let tasks = messages.iter().map(|message| {
            let task = self.spawn(message);
            let recorder = &recorder;
            async move {
                let outcome = task.await;
                outcome.record(recorder);
                outcome
            }
        });
        let outcomes = future::join_all(tasks).await;

        let flushed = match recorder.flush(self.sink.as_ref()) {
            Ok(flushed) => flushed,
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to flush metrics"
                );
                0
            }
        };

        let report = InvocationReport { outcomes, flushed };
        tracing::debug!(
            messages = messages.len(),
            successes = report.successes(),
            http_failures = report.http_failures(),
            transport_errors = report.transport_errors(),
            "handled invocation"
        );
        for outcome in &report.outcomes {
            merni::counter!("dispatch.outcomes": 1, "kind" => outcome.kind.as_str());
        }
        merni::distribution!("dispatch.invocation.duration"@s: start.elapsed());

        report
    }

    /// Starts the task for one message, resolving to its outcome.
    fn spawn(&self, message: &QueueMessage) -> BoxFuture<'static, DispatchOutcome> {
        let request: SimulatedRequest = match serde_json::from_str(&message.body) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    message_id = %message.message_id,
                    "failed to decode message"
                );
                let outcome = DispatchOutcome {
                    metric_name: UNPARSEABLE_METRIC.to_owned(),
                    duration: Duration::ZERO,
                    kind: OutcomeKind::TransportError {
                        reason: format!("invalid message body: {error}"),
                    },
                };
                return future::ready(outcome).boxed();
            }
        };

        let metric_name = request.metric_name.clone();
        let started = Instant::now();
        let handle: JoinHandle<DispatchOutcome> =
            tokio::spawn(dispatch(Arc::clone(&self.transport), request));

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        %metric_name,
                        "dispatch task failed"
                    );
                    DispatchOutcome {
                        metric_name,
                        duration: started.elapsed(),
                        kind: OutcomeKind::TransportError {
                            reason: format!("dispatch task failed: {error}"),
                        },
                    }
                }
            }
        }
        .boxed()
    }
}

/// Executes one request and classifies the result.
async fn dispatch(transport: SharedTransport, request: SimulatedRequest) -> DispatchOutcome {
    let call = OutboundCall::resolve(&request);

    let start = Instant::now();
    let result = transport.execute(call).await;
    let duration = start.elapsed();

    let kind = match result {
        Ok(completed) => OutcomeKind::from_status(completed.status),
        Err(error) => {
            tracing::debug!(
                error = &error as &dyn std::error::Error,
                metric_name = %request.metric_name,
                "request did not complete"
            );
            OutcomeKind::TransportError {
                reason: error.to_string(),
            }
        }
    };

    DispatchOutcome {
        metric_name: request.metric_name,
        duration,
        kind,
    }
}
