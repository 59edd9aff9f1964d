//! Queue-polling loop feeding the dispatch worker.
//!
//! Each receive of up to ten messages forms one invocation. After the invocation has settled,
//! every received message is acknowledged regardless of its outcome, so failed calls are
//! measured but never redelivered.

use std::time::Duration;

use anyhow::Result;
use loadsim_service::InvocationReport;
use loadsim_service::batch::MAX_BATCH_SIZE;
use loadsim_service::queue::{QueueMessage, ReceiptHandle};

use crate::state::ServiceState;

/// Pause after a failed receive before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Polls the queue and handles deliveries until shutdown is requested.
///
/// The in-flight invocation is always completed and acknowledged before this returns.
pub async fn run(state: ServiceState) -> Result<()> {
    let guard = elegant_departure::get_shutdown_guard();
    let max_messages = max_messages(&state);
    let wait = state.config.worker.poll_wait;

    tracing::info!(
        queue = state.queue.name(),
        max_messages,
        "Starting dispatch worker"
    );

    loop {
        let received = tokio::select! {
            _ = guard.wait() => break,
            received = state.queue.receive(max_messages, wait) => received,
        };

        match received {
            Ok(messages) if messages.is_empty() => continue,
            Ok(messages) => {
                invoke(&state, messages).await;
            }
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to receive messages"
                );
                tokio::select! {
                    _ = guard.wait() => break,
                    _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                }
            }
        }
    }

    tracing::info!("Dispatch worker stopped");
    Ok(())
}

/// Handles all messages that are currently in the queue, then returns.
///
/// Used for one-shot runs where triggering and dispatching happen in the same process.
pub async fn drain(state: &ServiceState) -> Result<Vec<InvocationReport>> {
    let max_messages = max_messages(state);
    let mut reports = Vec::new();

    loop {
        let messages = state.queue.receive(max_messages, Duration::ZERO).await?;
        if messages.is_empty() {
            break;
        }
        reports.push(invoke(state, messages).await);
    }

    Ok(reports)
}

/// Runs one invocation and acknowledges its messages.
async fn invoke(state: &ServiceState, messages: Vec<QueueMessage>) -> InvocationReport {
    let report = state.worker.handle(&messages).await;

    let receipts: Vec<ReceiptHandle> = messages.into_iter().map(|m| m.receipt).collect();
    if let Err(error) = state.queue.acknowledge(receipts).await {
        tracing::error!(
            error = &error as &dyn std::error::Error,
            "failed to acknowledge messages"
        );
    }

    report
}

fn max_messages(state: &ServiceState) -> usize {
    state.config.worker.max_messages.clamp(1, MAX_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use loadsim_service::error::{QueueError, QueueResult};
    use loadsim_service::metrics::InMemorySink;
    use loadsim_service::queue::{InMemoryQueue, Queue, QueueEntry, SendBatchResponse};
    use loadsim_service::transport::ReqwestTransport;
    use loadsim_types::SimulatedRequest;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::Config;
    use crate::state::State;

    /// Delivers like [`InMemoryQueue`] but refuses every acknowledgement.
    #[derive(Debug, Default)]
    struct UnackableQueue {
        inner: InMemoryQueue,
        ack_attempts: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Queue for UnackableQueue {
        fn name(&self) -> &'static str {
            "unackable"
        }

        async fn send_batch(&self, entries: Vec<QueueEntry>) -> QueueResult<SendBatchResponse> {
            self.inner.send_batch(entries).await
        }

        async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
            self.inner.receive(max, wait).await
        }

        async fn acknowledge(&self, _receipts: Vec<ReceiptHandle>) -> QueueResult<()> {
            self.ack_attempts.fetch_add(1, Ordering::Relaxed);
            Err(QueueError::Status {
                status: 503,
                message: "unavailable".into(),
            })
        }
    }

    async fn enqueue(queue: &InMemoryQueue, urls: &[String]) {
        for chunk in urls.chunks(MAX_BATCH_SIZE) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, url)| QueueEntry {
                    id: i.to_string(),
                    body: serde_json::to_string(&SimulatedRequest::get(url, "ping")).unwrap(),
                })
                .collect();
            queue.send_batch(entries).await.unwrap();
        }
    }

    #[tokio::test]
    async fn drain_handles_and_acknowledges_everything() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let queue = InMemoryQueue::new();
        let sink = InMemorySink::new();
        let state = State::from_parts(
            Config::default(),
            Arc::new(queue.clone()),
            Arc::new(ReqwestTransport::new(Duration::from_secs(5)).unwrap()),
            Arc::new(sink.clone()),
        );

        let mut urls: Vec<_> = (0..20).map(|_| format!("{}/ok", server.uri())).collect();
        urls.push(format!("{}/broken", server.uri()));
        enqueue(&queue, &urls).await;

        let reports = drain(&state).await.unwrap();

        assert_eq!(reports.len(), 3);
        let outcomes: usize = reports.iter().map(|r| r.outcomes.len()).sum();
        assert_eq!(outcomes, 21);
        assert_eq!(sink.total("ping-total-calls"), 21.0);
        assert_eq!(sink.total("ping-successes"), 20.0);
        assert_eq!(sink.total("ping-failures"), 1.0);
        assert_eq!(sink.flushes(), 3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn invocation_size_is_capped() {
        let queue = InMemoryQueue::new();
        let mut config = Config::default();
        config.worker.max_messages = 50;
        let state = State::from_parts(
            config,
            Arc::new(queue.clone()),
            Arc::new(ReqwestTransport::new(Duration::from_millis(100)).unwrap()),
            Arc::new(InMemorySink::new()),
        );

        // Nothing listens here, so every call fails fast.
        let urls: Vec<_> = (0..15).map(|i| format!("http://127.0.0.1:1/{i}")).collect();
        enqueue(&queue, &urls).await;

        let reports = drain(&state).await.unwrap();
        let sizes: Vec<_> = reports.iter().map(|r| r.outcomes.len()).collect();
        assert_eq!(sizes, [10, 5]);
        assert!(reports.iter().all(|r| r.successes() == 0));
    }

    #[tokio::test]
    async fn failed_acknowledge_keeps_report() {
        let queue = Arc::new(UnackableQueue::default());
        let sink = InMemorySink::new();
        let state = State::from_parts(
            Config::default(),
            queue.clone(),
            Arc::new(ReqwestTransport::new(Duration::from_millis(100)).unwrap()),
            Arc::new(sink.clone()),
        );

        let urls: Vec<_> = (0..12).map(|i| format!("http://127.0.0.1:1/{i}")).collect();
        enqueue(&queue.inner, &urls).await;

        let reports = drain(&state).await.unwrap();

        let sizes: Vec<_> = reports.iter().map(|r| r.outcomes.len()).collect();
        assert_eq!(sizes, [10, 2]);
        assert_eq!(sink.total("ping-total-calls"), 12.0);
        assert_eq!(sink.flushes(), 2);
        assert_eq!(queue.ack_attempts.load(Ordering::Relaxed), 2);
        assert_eq!(queue.inner.in_flight_len(), 12);
    }
}
