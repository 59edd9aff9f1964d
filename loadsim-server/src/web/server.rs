use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal::unix::SignalKind;

use crate::config::Config;
use crate::state::State;
use crate::web::app::App;
use crate::worker;

/// The maximum backlog for TCP listen sockets before refusing connections.
const TCP_LISTEN_BACKLOG: u32 = 1024;

/// Runs the loadsim HTTP API and, if enabled, the dispatch worker.
///
/// Both run until termination is requested. The worker finishes its in-flight invocation before
/// this returns.
pub async fn server(config: Config) -> Result<()> {
    tracing::info!("Starting server");
    merni::counter!("server.start": 1);

    let listener = listen(&config).context("failed to start TCP listener")?;
    let state = State::new(config)?;

    let worker_handle = state
        .config
        .worker
        .enabled
        .then(|| tokio::spawn(worker::run(state.clone())));

    let server_handle = tokio::spawn(async move {
        App::new(state)
            .graceful_shutdown(true)
            .serve(listener)
            .await
    });

    tokio::spawn(async move {
        elegant_departure::get_shutdown_guard().wait().await;
        tracing::info!("Shutting down ...");
    });

    depart().await;

    let server_result = server_handle.await?;
    if let Some(worker_handle) = worker_handle {
        worker_handle.await??;
    }
    tracing::info!("Shutdown complete");
    server_result
}

/// Runs only the dispatch worker until termination is requested.
pub async fn worker(config: Config) -> Result<()> {
    let state = State::new(config)?;
    let worker_handle = tokio::spawn(worker::run(state));

    depart().await;

    worker_handle.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Waits for a termination signal and then for all shutdown guards to be released.
async fn depart() {
    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit())
        .await;
}

fn listen(config: &Config) -> Result<TcpListener> {
    let addr = config.http_addr;
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;

    let listener = socket.listen(TCP_LISTEN_BACKLOG)?;
    tracing::info!("HTTP server listening on {addr}");

    Ok(listener)
}
