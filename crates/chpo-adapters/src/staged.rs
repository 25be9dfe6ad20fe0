//! Sequential search split into buckets of growing budget.
//!
//! Every bucket extends the same trial history, so later buckets build on
//! everything learned at lower budgets.

use serde::{Deserialize, Serialize};
use tracing::info;

use chpo_search::{fmin, Trials};
use chpo_types::{validation_error, HpoResult, Objective, SearchSpace, Split};

use crate::config::AdapterConfig;

/// Work assigned to one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketPlan {
    /// 1-based bucket index.
    pub bucket: usize,
    /// Budget for every evaluation in this bucket.
    pub budget: f64,
    /// Evaluations added by this bucket.
    pub allotment: usize,
    /// Size the trial history reaches at the end of this bucket.
    pub cumulative: usize,
}

/// Split `n_parent` evaluations over `n_buckets` buckets whose budgets climb
/// linearly to `n_base`.
///
/// The allotment rounds down per bucket, so the total can land a little
/// away from `n_parent`.
pub fn bucket_schedule(
    n_parent: usize,
    n_base: f64,
    n_buckets: usize,
) -> HpoResult<Vec<BucketPlan>> {
    if n_buckets == 0 {
        return Err(validation_error!("staged search needs at least one bucket"));
    }

    let n = n_buckets as f64;
    let bucket_size = n_parent as f64 / n;
    let mut cumulative = 0;

    Ok((1..=n_buckets)
        .map(|bucket| {
            let i = bucket as f64;
            let budget = i * n_base / n;
            let save = 1.0 - (n - i) / n;
            let allotment = (bucket_size + ((save * bucket_size) * n) / i) as usize;
            cumulative += allotment;
            BucketPlan {
                bucket,
                budget,
                allotment,
                cumulative,
            }
        })
        .collect())
}

/// Staged sequential search over a borrowed space, objective and problem.
pub struct StagedSequentialSearch<'a, O: ?Sized, P: ?Sized> {
    space: &'a SearchSpace,
    objective: &'a O,
    problem: &'a P,
    n_buckets: usize,
    config: AdapterConfig,
}

impl<'a, O, P> StagedSequentialSearch<'a, O, P>
where
    O: Objective<P> + ?Sized,
    P: ?Sized,
{
    pub fn new(space: &'a SearchSpace, objective: &'a O, problem: &'a P, n_buckets: usize) -> Self {
        Self {
            space,
            objective,
            problem,
            n_buckets,
            config: AdapterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Run every bucket, then score the best configuration of the whole
    /// history once on the test split at budget `n_base`.
    pub fn run(&self, n_parent: usize, n_base: f64) -> HpoResult<f64> {
        let schedule = bucket_schedule(n_parent, n_base, self.n_buckets)?;
        let mut strategy = self.config.strategy.build(&self.config.tpe, self.config.seed);
        let mut trials = Trials::new();

        info!(
            strategy = strategy.name(),
            n_parent,
            n_base,
            n_buckets = self.n_buckets,
            "starting staged search"
        );

        let mut best = None;
        for plan in &schedule {
            let budget = plan.budget;
            let chosen = fmin(
                |config| {
                    self.objective
                        .evaluate(config, budget, self.problem, Split::Validation)
                },
                self.space,
                plan.cumulative,
                strategy.as_mut(),
                &mut trials,
            )?;
            info!(
                bucket = plan.bucket,
                budget,
                evaluations = trials.len(),
                "bucket finished"
            );
            best = Some(chosen);
        }

        let best = best.ok_or_else(|| validation_error!("staged search ran no buckets"))?;
        let loss = self
            .objective
            .evaluate(&best, n_base, self.problem, Split::Test)?;
        info!(evaluations = trials.len(), test_loss = loss, "staged search finished");
        Ok(loss)
    }
}
