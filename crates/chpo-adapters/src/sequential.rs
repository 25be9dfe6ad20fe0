//! Single-pass sequential search.

use tracing::info;

use chpo_search::{fmin, Trials};
use chpo_types::{HpoResult, Objective, SearchSpace, Split};

use crate::config::AdapterConfig;

/// Run `n_parent` TPE-guided evaluations at budget `n_base` on the
/// validation split, then score the best configuration once on the test
/// split at budget `n_parent`.
pub fn sequential_search<O, P>(
    space: &SearchSpace,
    objective: &O,
    problem: &P,
    n_parent: usize,
    n_base: f64,
) -> HpoResult<f64>
where
    O: Objective<P> + ?Sized,
    P: ?Sized,
{
    SequentialSearch::new(AdapterConfig::default()).run(space, objective, problem, n_parent, n_base)
}

/// Sequential search with an explicit strategy, TPE settings and seed.
#[derive(Debug, Clone, Default)]
pub struct SequentialSearch {
    config: AdapterConfig,
}

impl SequentialSearch {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    pub fn run<O, P>(
        &self,
        space: &SearchSpace,
        objective: &O,
        problem: &P,
        n_parent: usize,
        n_base: f64,
    ) -> HpoResult<f64>
    where
        O: Objective<P> + ?Sized,
        P: ?Sized,
    {
        let mut strategy = self.config.strategy.build(&self.config.tpe, self.config.seed);
        let mut trials = Trials::new();

        info!(strategy = strategy.name(), n_parent, n_base, "starting sequential search");

        let best = fmin(
            |config| objective.evaluate(config, n_base, problem, Split::Validation),
            space,
            n_parent,
            strategy.as_mut(),
            &mut trials,
        )?;

        let test_budget = n_parent as f64;
        let loss = objective.evaluate(&best, test_budget, problem, Split::Test)?;
        info!(
            evaluations = trials.len(),
            test_budget,
            test_loss = loss,
            "sequential search finished"
        );
        Ok(loss)
    }
}
