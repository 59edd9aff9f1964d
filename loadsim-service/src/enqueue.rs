//! Hands batches to the queue.
//!
//! All batches of a run are submitted concurrently and settle independently. A batch that fails
//! to reach the queue is logged and reported, but it neither cancels nor retries its siblings.

use futures_util::future;

use crate::batch::Batch;
use crate::error::BatchSubmitError;
use crate::queue::{QueueEntry, SharedQueue};

/// Outcome of submitting all batches of a run.
#[derive(Debug, Default)]
pub struct EnqueueReport {
    /// Number of batches submitted.
    pub batches: usize,
    /// Number of requests across all batches.
    pub requests: usize,
    /// Number of requests the queue accepted.
    pub enqueued: usize,
    /// One error per batch that was not fully accepted, in batch order.
    pub failures: Vec<BatchSubmitError>,
}

impl EnqueueReport {
    /// Returns `true` if every batch was fully accepted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Submits batches to a [`Queue`](crate::queue::Queue) with per-batch failure isolation.
#[derive(Clone, Debug)]
pub struct BatchEnqueuer {
    queue: SharedQueue,
}

impl BatchEnqueuer {
    /// Creates an enqueuer submitting to `queue`.
    pub fn new(queue: SharedQueue) -> Self {
        Self { queue }
    }

    /// Submits every batch and waits until all submissions have settled.
    ///
    /// This never fails: errors of individual batches are collected in the returned report.
    pub async fn enqueue(&self, batches: Vec<Batch>) -> EnqueueReport {
        let mut report = EnqueueReport {
            batches: batches.len(),
            requests: batches.iter().map(Batch::len).sum(),
            ..Default::default()
        };

        let submissions = batches
            .into_iter()
            .enumerate()
            .map(|(index, batch)| self.submit(index, batch));

        for result in future::join_all(submissions).await {
            match result {
                Ok(accepted) => report.enqueued += accepted,
                Err((accepted, error)) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        batch = error.batch(),
                        queue = self.queue.name(),
                        "failed to enqueue batch"
                    );
                    report.enqueued += accepted;
                    report.failures.push(error);
                }
            }
        }

        let failed = report.failures.len() as u64;
        merni::counter!("enqueue.batches": report.batches as u64 - failed, "status" => "ok");
        merni::counter!("enqueue.batches": failed, "status" => "failed");

        report
    }

    /// Submits one batch, returning the number of accepted requests.
    async fn submit(
        &self,
        index: usize,
        batch: Batch,
    ) -> Result<usize, (usize, BatchSubmitError)> {
        let len = batch.len();
        let mut entries = Vec::with_capacity(len);
        for (entry, request) in batch.requests().iter().enumerate() {
            let body = serde_json::to_string(request).map_err(|cause| {
                let error = BatchSubmitError::Serialize {
                    batch: index,
                    entry,
                    cause,
                };
                (0, error)
            })?;
            entries.push(QueueEntry {
                id: entry.to_string(),
                body,
            });
        }

        let response = self.queue.send_batch(entries).await.map_err(|cause| {
            let error = BatchSubmitError::Queue {
                batch: index,
                cause,
            };
            (0, error)
        })?;

        if response.rejected.is_empty() {
            tracing::trace!(batch = index, requests = len, "enqueued batch");
            Ok(len)
        } else {
            let accepted = len.saturating_sub(response.rejected.len());
            let error = BatchSubmitError::Rejected {
                batch: index,
                rejected: response.rejected,
            };
            Err((accepted, error))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use loadsim_types::SimulatedRequest;
    use tokio::sync::Barrier;

    use super::*;
    use crate::batch::into_batches;
    use crate::error::{QueueError, QueueResult, RejectedEntry};
    use crate::queue::{InMemoryQueue, Queue, QueueMessage, ReceiptHandle, SendBatchResponse};

    /// Fails every batch containing a `fail` request and rejects entries of `reject` requests.
    ///
    /// With a barrier, every submission waits until all parties are in flight.
    #[derive(Debug, Default)]
    struct FlakyQueue {
        inner: InMemoryQueue,
        barrier: Option<Barrier>,
    }

    #[async_trait::async_trait]
    impl Queue for FlakyQueue {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send_batch(&self, entries: Vec<QueueEntry>) -> QueueResult<SendBatchResponse> {
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }

            if entries.iter().any(|e| e.body.contains("\"fail\"")) {
                return Err(QueueError::Status {
                    status: 500,
                    message: "boom".into(),
                });
            }

            let (rejected, accepted): (Vec<_>, Vec<_>) = entries
                .into_iter()
                .partition(|e| e.body.contains("\"reject\""));
            if !accepted.is_empty() {
                self.inner.send_batch(accepted).await?;
            }

            Ok(SendBatchResponse {
                rejected: rejected
                    .into_iter()
                    .map(|e| RejectedEntry {
                        id: e.id,
                        message: "rejected".into(),
                    })
                    .collect(),
            })
        }

        async fn receive(&self, max: usize, wait: Duration) -> QueueResult<Vec<QueueMessage>> {
            self.inner.receive(max, wait).await
        }

        async fn acknowledge(&self, receipts: Vec<ReceiptHandle>) -> QueueResult<()> {
            self.inner.acknowledge(receipts).await
        }
    }

    fn requests(metric_names: &[&str]) -> Vec<SimulatedRequest> {
        metric_names
            .iter()
            .enumerate()
            .map(|(i, name)| SimulatedRequest::get(format!("http://localhost/users/{i}"), *name))
            .collect()
    }

    #[tokio::test]
    async fn enqueues_all_batches() {
        let queue = InMemoryQueue::new();
        let enqueuer = BatchEnqueuer::new(Arc::new(queue.clone()));

        let batches = into_batches(requests(&["user"; 25]));
        let report = enqueuer.enqueue(batches).await;

        assert!(report.is_complete());
        assert_eq!(report.batches, 3);
        assert_eq!(report.requests, 25);
        assert_eq!(report.enqueued, 25);
        assert_eq!(queue.ready_len(), 25);
    }

    #[tokio::test]
    async fn message_bodies_are_serialized_requests() {
        let queue = InMemoryQueue::new();
        let enqueuer = BatchEnqueuer::new(Arc::new(queue.clone()));

        let input = requests(&["user", "followers"]);
        enqueuer.enqueue(into_batches(input.clone())).await;

        let messages = queue.receive(10, Duration::ZERO).await.unwrap();
        let decoded: Vec<SimulatedRequest> = messages
            .iter()
            .map(|m| serde_json::from_str(&m.body).unwrap())
            .collect();
        assert_eq!(decoded, input);
    }

    #[tokio::test]
    async fn failed_batch_does_not_affect_siblings() {
        let queue = FlakyQueue::default();
        let inner = queue.inner.clone();
        let enqueuer = BatchEnqueuer::new(Arc::new(queue));

        let mut names = vec!["user"; 30];
        names[14] = "fail";
        let report = enqueuer.enqueue(into_batches(requests(&names))).await;

        assert_eq!(report.batches, 3);
        assert_eq!(report.enqueued, 20);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0],
            BatchSubmitError::Queue { batch: 1, .. }
        ));
        assert_eq!(inner.ready_len(), 20);
    }

    #[tokio::test]
    async fn batches_are_submitted_concurrently() {
        let queue = FlakyQueue {
            barrier: Some(Barrier::new(4)),
            ..Default::default()
        };
        let inner = queue.inner.clone();
        let enqueuer = BatchEnqueuer::new(Arc::new(queue));

        let mut names = vec!["user"; 40];
        names[25] = "fail";
        let batches = into_batches(requests(&names));

        // Every submission waits until all four are in flight, which only works concurrently.
        let report = tokio::time::timeout(Duration::from_secs(5), enqueuer.enqueue(batches))
            .await
            .expect("batches were not submitted concurrently");

        assert_eq!(report.batches, 4);
        assert_eq!(report.enqueued, 30);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].batch(), 2);
        assert_eq!(inner.ready_len(), 30);
    }

    #[tokio::test]
    async fn rejected_entries_surface_as_batch_error() {
        let queue = FlakyQueue::default();
        let inner = queue.inner.clone();
        let enqueuer = BatchEnqueuer::new(Arc::new(queue));

        let mut names = vec!["user"; 12];
        names[3] = "reject";
        let report = enqueuer.enqueue(into_batches(requests(&names))).await;

        assert_eq!(report.enqueued, 11);
        assert_eq!(inner.ready_len(), 11);
        let [BatchSubmitError::Rejected { batch, rejected }] = report.failures.as_slice() else {
            panic!("expected a single rejection, got {:?}", report.failures);
        };
        assert_eq!(*batch, 0);
        assert_eq!(rejected[0].id, "3");
    }

    #[tokio::test]
    async fn empty_plan_enqueues_nothing() {
        let queue = InMemoryQueue::new();
        let enqueuer = BatchEnqueuer::new(Arc::new(queue.clone()));

        let report = enqueuer.enqueue(vec![]).await;
        assert!(report.is_complete());
        assert_eq!(report.batches, 0);
        assert!(queue.is_empty());
    }
}
