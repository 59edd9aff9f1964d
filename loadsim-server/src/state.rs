use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use loadsim_service::metrics::{EmfSink, MerniSink};
use loadsim_service::queue::{HttpQueue, InMemoryQueue};
use loadsim_service::transport::ReqwestTransport;
use loadsim_service::{
    BatchEnqueuer, DispatchWorker, LoadTrigger, SharedQueue, SharedSink, SharedTransport,
};
use tokio::runtime::Handle;

use crate::config::{Config, Queue, Sink};

/// Shared reference to the loadsim [service state](State).
pub type ServiceState = Arc<State>;

/// Reference to the loadsim pipeline.
///
/// This structure is created during startup and shared with all HTTP request handlers and the
/// queue-polling worker. The queue, transport and sink it holds are constructed once per process.
///
/// In request handlers, use `axum::extract::State<ServiceState>` to retrieve a shared reference to
/// this structure.
#[derive(Debug)]
pub struct State {
    /// The server configuration.
    pub config: Config,
    /// The queue between triggering and dispatching.
    pub queue: SharedQueue,
    /// Plans and enqueues runs.
    pub trigger: LoadTrigger,
    /// Handles queue deliveries.
    pub worker: DispatchWorker,
}

impl State {
    /// Builds all components from the configuration and spawns background tasks.
    pub fn new(config: Config) -> anyhow::Result<ServiceState> {
        let queue = build_queue(&config.queue)?;
        let transport: SharedTransport = Arc::new(
            ReqwestTransport::new(config.worker.request_timeout)
                .context("failed to create HTTP transport")?,
        );
        let sink = build_sink(&config.sink);

        Ok(Self::from_parts(config, queue, transport, sink))
    }

    /// Assembles the state from explicitly constructed components.
    pub fn from_parts(
        config: Config,
        queue: SharedQueue,
        transport: SharedTransport,
        sink: SharedSink,
    ) -> ServiceState {
        tokio::spawn(track_runtime_metrics(config.runtime.metrics_interval));

        let enqueuer = BatchEnqueuer::new(Arc::clone(&queue));
        let trigger = LoadTrigger::new(enqueuer, &config.base_url, config.endpoints.clone())
            .with_max_requests(config.max_requests);
        let worker = DispatchWorker::new(transport, sink);

        Arc::new(Self {
            config,
            queue,
            trigger,
            worker,
        })
    }
}

fn build_queue(config: &Queue) -> anyhow::Result<SharedQueue> {
    Ok(match config {
        Queue::Memory => Arc::new(InMemoryQueue::new()),
        Queue::Http { url, timeout } => Arc::new(
            HttpQueue::new(url, *timeout).context("failed to create queue client")?,
        ),
    })
}

fn build_sink(config: &Sink) -> SharedSink {
    match config {
        Sink::Emf { namespace, service } => Arc::new(EmfSink::stdout(namespace, service)),
        Sink::Datadog => Arc::new(MerniSink),
    }
}

/// Periodically captures and reports internal Tokio runtime metrics.
async fn track_runtime_metrics(interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let metrics = Handle::current().metrics();

    loop {
        ticker.tick().await;
        tracing::trace!("Capturing runtime metrics");

        merni::gauge!("runtime.num_workers": metrics.num_workers());
        merni::gauge!("runtime.num_alive_tasks": metrics.num_alive_tasks());
        merni::gauge!("runtime.global_queue_depth": metrics.global_queue_depth());
    }
}
