//! Planning and enqueueing of a load run.

use loadsim_types::LoadPlanRequest;
use rand::Rng;

use crate::batch::into_batches;
use crate::enqueue::{BatchEnqueuer, EnqueueReport};
use crate::error::PlanError;
use crate::plan::{EndpointTemplate, build_plan};

/// Default upper bound on the request count of a single run.
pub const DEFAULT_MAX_REQUESTS: u64 = 1_000_000;

/// Starts load runs against a fixed base URL and set of endpoint templates.
///
/// A run is planned, split into batches and handed to the queue. The returned report covers the
/// enqueue phase only; the calls themselves are issued later by the dispatch worker.
#[derive(Clone, Debug)]
pub struct LoadTrigger {
    enqueuer: BatchEnqueuer,
    base_url: String,
    endpoints: Vec<EndpointTemplate>,
    max_requests: u64,
}

impl LoadTrigger {
    /// Creates a trigger for the system under test at `base_url`.
    pub fn new(
        enqueuer: BatchEnqueuer,
        base_url: impl Into<String>,
        endpoints: Vec<EndpointTemplate>,
    ) -> Self {
        Self {
            enqueuer,
            base_url: base_url.into(),
            endpoints,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }

    /// Sets the largest request count a run may ask for.
    pub fn with_max_requests(mut self, max_requests: u64) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Returns the configured endpoint templates.
    pub fn endpoints(&self) -> &[EndpointTemplate] {
        &self.endpoints
    }

    /// Plans a run and enqueues all of its requests.
    ///
    /// Planning errors are returned before anything is enqueued, including
    /// [`PlanError::TooManyRequests`] for runs above the configured maximum. Failures of
    /// individual batches do not fail the run and are listed in the report instead.
    pub async fn trigger<R>(
        &self,
        request: LoadPlanRequest,
        rng: &mut R,
    ) -> Result<EnqueueReport, PlanError>
    where
        R: Rng + ?Sized,
    {
        if request.request_count > self.max_requests {
            return Err(PlanError::TooManyRequests {
                requested: request.request_count,
                limit: self.max_requests,
            });
        }

        let plan = build_plan(request, &self.base_url, &self.endpoints, rng)?;
        let planned = plan.len();
        merni::counter!("trigger.requests": planned as u64);

        let report = self.enqueuer.enqueue(into_batches(plan)).await;
        tracing::info!(
            request_count = request.request_count,
            user_count = request.user_count,
            planned,
            batches = report.batches,
            enqueued = report.enqueued,
            failed_batches = report.failures.len(),
            "triggered load run"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use loadsim_types::SimulatedRequest;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::plan::default_endpoints;
    use crate::queue::{InMemoryQueue, Queue};

    fn trigger(queue: &InMemoryQueue) -> LoadTrigger {
        let enqueuer = BatchEnqueuer::new(Arc::new(queue.clone()));
        LoadTrigger::new(enqueuer, "https://api.test", default_endpoints())
    }

    #[tokio::test]
    async fn small_run_fits_in_one_batch() {
        let queue = InMemoryQueue::new();
        let mut rng = SmallRng::seed_from_u64(7);

        let request = LoadPlanRequest {
            request_count: 8,
            user_count: 100,
        };
        let report = trigger(&queue).trigger(request, &mut rng).await.unwrap();

        assert_eq!(report.batches, 1);
        assert_eq!(report.requests, 8);
        assert_eq!(report.enqueued, 8);
        assert!(report.is_complete());
        assert_eq!(queue.ready_len(), 8);

        let messages = queue.receive(10, Duration::ZERO).await.unwrap();
        let names: Vec<_> = messages
            .iter()
            .map(|m| {
                let request: SimulatedRequest = serde_json::from_str(&m.body).unwrap();
                request.metric_name
            })
            .collect();
        assert_eq!(
            names,
            [
                "followers",
                "cached-followers",
                "user",
                "cached-user",
                "followers",
                "cached-followers",
                "user",
                "cached-user",
            ]
        );
    }

    #[tokio::test]
    async fn large_run_is_batched() {
        let queue = InMemoryQueue::new();
        let mut rng = SmallRng::seed_from_u64(7);

        let request = LoadPlanRequest {
            request_count: 103,
            user_count: 5,
        };
        let report = trigger(&queue).trigger(request, &mut rng).await.unwrap();

        assert_eq!(report.requests, 100);
        assert_eq!(report.batches, 10);
        assert_eq!(queue.ready_len(), 100);
    }

    #[tokio::test]
    async fn invalid_run_enqueues_nothing() {
        let queue = InMemoryQueue::new();
        let mut rng = SmallRng::seed_from_u64(7);

        let request = LoadPlanRequest {
            request_count: 8,
            user_count: 0,
        };
        let error = trigger(&queue).trigger(request, &mut rng).await.unwrap_err();

        assert_eq!(error, PlanError::EmptyUserUniverse);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn oversized_run_is_rejected_before_planning() {
        let queue = InMemoryQueue::new();
        let mut rng = SmallRng::seed_from_u64(7);
        let trigger = trigger(&queue).with_max_requests(100);

        let request = LoadPlanRequest {
            request_count: 40_000_000_000_000_000,
            user_count: 10,
        };
        let error = trigger.trigger(request, &mut rng).await.unwrap_err();
        assert_eq!(
            error,
            PlanError::TooManyRequests {
                requested: 40_000_000_000_000_000,
                limit: 100,
            }
        );
        assert!(queue.is_empty());

        let request = LoadPlanRequest {
            request_count: 100,
            user_count: 10,
        };
        let report = trigger.trigger(request, &mut rng).await.unwrap();
        assert_eq!(report.requests, 100);
    }
}
