use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use loadsim_types::LoadPlanRequest;

use crate::config::Config;
use crate::{healthcheck, observability, oneshot, web};

/// Synthetic load generator.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Worker(WorkerCommand),
    Trigger(TriggerCommand),
    Healthcheck(HealthcheckCommand),
    Version(VersionCommand),
}

/// run the HTTP API and the dispatch worker
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// run only the dispatch worker
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "worker")]
struct WorkerCommand {}

/// plan and enqueue a single run
///
/// With the in-memory queue, the run is also dispatched locally and a summary is printed.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "trigger")]
struct TriggerCommand {
    /// total number of calls to issue across all endpoints
    #[argh(option)]
    request_count: u64,

    /// number of distinct simulated users to pick from
    #[argh(option)]
    user_count: u64,

    /// seed for reproducible user selection
    #[argh(option)]
    seed: Option<u64>,
}

/// perform a healthcheck against the running loadsim server
///
/// This command checks if the loadsim server is available on the configured host and port. This
/// is used for Docker healthchecks.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "healthcheck")]
struct HealthcheckCommand {}

/// print the loadsim version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let metrics_guard = observability::init_metrics(&config)?;

    let result = runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => web::server(config).await,
            Command::Worker(WorkerCommand {}) => web::worker(config).await,
            Command::Trigger(TriggerCommand {
                request_count,
                user_count,
                seed,
            }) => {
                let request = LoadPlanRequest {
                    request_count,
                    user_count,
                };
                oneshot::trigger(config, request, seed).await
            }
            Command::Healthcheck(HealthcheckCommand {}) => healthcheck::healthcheck(config).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    });

    // Flush metrics unconditionally before shutdown, even on error.
    runtime.block_on(async {
        if let Some(metrics_guard) = metrics_guard {
            metrics_guard.flush(None).await.ok();
        }
    });

    result
}
