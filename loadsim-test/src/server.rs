//! Exposes an in-process test server for use in integration tests.
//!
//! ```
//! use loadsim_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let url = server.url("/health");
//!    // use the URL in tests...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use loadsim_server::config::Config;
use loadsim_server::state::{ServiceState, State};
use loadsim_server::web::App;
use loadsim_service::metrics::InMemorySink;
use loadsim_service::queue::InMemoryQueue;
use loadsim_service::transport::ReqwestTransport;

/// An in-process test server for use in integration tests.
///
/// The server runs the HTTP API on top of an in-memory queue and records all measurements in an
/// [`InMemorySink`]. It listens on a random available port on localhost. The dispatch worker does
/// not run on its own; use [`loadsim_server::worker::drain`] with [`TestServer::state`] to
/// dispatch queued requests.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: ServiceState,
    queue: InMemoryQueue,
    sink: InMemorySink,
}

impl TestServer {
    /// Starts a server with the default configuration.
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    /// Starts a server with the given configuration.
    ///
    /// The queue and sink settings of `config` are ignored.
    pub async fn with_config(config: Config) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let queue = InMemoryQueue::new();
        let sink = InMemorySink::new();
        let transport = ReqwestTransport::new(Duration::from_secs(5)).unwrap();
        let state = State::from_parts(
            config,
            Arc::new(queue.clone()),
            Arc::new(transport),
            Arc::new(sink.clone()),
        );
        let app = App::new(state.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            app.serve(listener).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
            queue,
            sink,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// Returns the shared state of the server.
    pub fn state(&self) -> &ServiceState {
        &self.state
    }

    /// Returns the queue runs are enqueued to.
    pub fn queue(&self) -> &InMemoryQueue {
        &self.queue
    }

    /// Returns the sink receiving all measurements.
    pub fn sink(&self) -> &InMemorySink {
        &self.sink
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
