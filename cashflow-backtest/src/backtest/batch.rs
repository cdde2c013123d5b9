//! Parallel execution of independent runs.
//!
//! Each job owns its configuration and gets a private engine and ledger;
//! datasets are shared read-only through `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::info;

use super::config::SimulationConfig;
use super::engine::run_simulation;
use super::record::SimulationReport;
use crate::data::MarketDataset;
use crate::error::SimulationError;

/// One run to execute.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub name: String,
    pub config: SimulationConfig,
    pub dataset: Arc<MarketDataset>,
}

/// Result of one job, in input order.
#[derive(Debug)]
pub struct BatchOutcome {
    pub name: String,
    pub result: Result<SimulationReport, SimulationError>,
}

/// Run every job on the rayon pool.
pub fn run_batch(jobs: &[BatchJob]) -> Vec<BatchOutcome> {
    run_batch_with_progress(jobs, |_, _| {})
}

/// Run every job, calling `on_done(done, total)` as each finishes.
pub fn run_batch_with_progress<F>(jobs: &[BatchJob], on_done: F) -> Vec<BatchOutcome>
where
    F: Fn(usize, usize) + Sync,
{
    let total = jobs.len();
    let progress = AtomicUsize::new(0);
    info!(jobs = total, "running batch");

    let outcomes: Vec<BatchOutcome> = jobs
        .par_iter()
        .map(|job| {
            let result = run_simulation(&job.config, &job.dataset);
            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            on_done(done, total);
            BatchOutcome {
                name: job.name.clone(),
                result,
            }
        })
        .collect();

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    info!(jobs = total, failed, "batch complete");
    outcomes
}
