//! One-shot runs started from the command line.

use anyhow::Result;
use loadsim_types::LoadPlanRequest;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio::time::Instant;
use yansi::Paint;

use crate::config::{Config, Queue};
use crate::state::State;
use crate::summary::RunSummary;
use crate::worker;

/// Plans and enqueues a single run.
///
/// With the in-memory queue nobody else can consume the messages, so the run is dispatched
/// locally right away and a summary is printed once every call has settled. With an external
/// queue, dispatching is left to the running workers.
pub async fn trigger(config: Config, request: LoadPlanRequest, seed: Option<u64>) -> Result<()> {
    let state = State::new(config)?;
    let mut rng = match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };

    let start = Instant::now();
    let report = state.trigger.trigger(request, &mut rng).await?;

    println!(
        "{} {} requests in {} batches",
        "Enqueued".bold(),
        report.enqueued.bold(),
        report.batches.bold()
    );
    if !report.is_complete() {
        println!(
            "{}",
            format!("{} BATCHES FAILED", report.failures.len()).bold().red()
        );
    }

    if matches!(state.config.queue, Queue::Memory) {
        let reports = worker::drain(&state).await?;
        RunSummary::from_reports(&reports).print(start.elapsed());
    }

    Ok(())
}
