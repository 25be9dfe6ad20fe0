//! Configuration generators for bandit scheduling.

use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use chpo_types::{Configuration, HpoResult, SearchSpace, UnitKind};

use crate::kde::ProductKde;
use crate::parzen::truncated_normal;
use crate::strategy::make_rng;

/// Source of new configurations for the first stage of a bracket.
pub trait ConfigGenerator: Send {
    /// Propose a configuration that will first be evaluated at `budget`.
    fn get_config(&mut self, budget: f64) -> HpoResult<Configuration>;

    /// Observe a finished evaluation.
    fn new_result(&mut self, _config: &Configuration, _budget: f64, _loss: f64) -> HpoResult<()> {
        Ok(())
    }

    /// Human-readable generator name.
    fn name(&self) -> &str;
}

// ---- Random sampling (plain Hyperband) ----

/// Uniform sampling, ignoring all results.
#[derive(Debug, Clone)]
pub struct RandomSampling {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSampling {
    pub fn new(space: SearchSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: make_rng(seed),
        }
    }
}

impl ConfigGenerator for RandomSampling {
    fn get_config(&mut self, _budget: f64) -> HpoResult<Configuration> {
        Ok(self.space.sample(&mut self.rng))
    }

    fn name(&self) -> &str {
        "random_sampling"
    }
}

// ---- BOHB ----

/// Settings for the BOHB density model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BohbConfig {
    /// Observations a budget needs before it gets a model; `None` means
    /// one more than the number of parameters.
    pub min_points_in_model: Option<usize>,
    /// Percentage of observations modelled as "good".
    pub top_n_percent: usize,
    /// Candidates scored per model-based suggestion.
    pub num_samples: usize,
    /// Fraction of suggestions drawn uniformly even when a model exists.
    pub random_fraction: f64,
    /// Widening applied to good-density bandwidths when drawing candidates.
    pub bandwidth_factor: f64,
    pub min_bandwidth: f64,
}

impl Default for BohbConfig {
    fn default() -> Self {
        Self {
            min_points_in_model: None,
            top_n_percent: 15,
            num_samples: 64,
            random_fraction: 1.0 / 3.0,
            bandwidth_factor: 3.0,
            min_bandwidth: 1e-3,
        }
    }
}

impl BohbConfig {
    pub fn with_min_points_in_model(mut self, n: usize) -> Self {
        self.min_points_in_model = Some(n);
        self
    }

    pub fn with_random_fraction(mut self, fraction: f64) -> Self {
        self.random_fraction = fraction.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Clone)]
struct BudgetModel {
    budget: f64,
    points: Vec<Vec<f64>>,
    losses: Vec<f64>,
    densities: Option<(ProductKde, ProductKde)>,
}

/// Model-based generator of BOHB: good/bad product KDEs per budget, with
/// candidates drawn around good points and ranked by `l(x) / g(x)`.
#[derive(Debug, Clone)]
pub struct BohbGenerator {
    space: SearchSpace,
    kinds: Vec<UnitKind>,
    config: BohbConfig,
    min_points: usize,
    rng: StdRng,
    budgets: Vec<BudgetModel>,
}

impl BohbGenerator {
    pub fn new(space: SearchSpace, config: BohbConfig, seed: Option<u64>) -> Self {
        let kinds = space.unit_kinds();
        let min_points = config.min_points_in_model.unwrap_or(kinds.len() + 1);
        Self {
            space,
            kinds,
            config,
            min_points,
            rng: make_rng(seed),
            budgets: Vec::new(),
        }
    }

    /// Largest budget that currently has a fitted model.
    pub fn model_budget(&self) -> Option<f64> {
        self.budgets
            .iter()
            .filter(|b| b.densities.is_some())
            .map(|b| b.budget)
            .fold(None, |acc: Option<f64>, b| Some(acc.map_or(b, |a| a.max(b))))
    }

    /// Observations recorded for `budget`.
    pub fn observations(&self, budget: f64) -> usize {
        self.budgets
            .iter()
            .find(|b| same_budget(b.budget, budget))
            .map_or(0, |b| b.points.len())
    }

    fn fit(&self, points: &[Vec<f64>], losses: &[f64]) -> Option<(ProductKde, ProductKde)> {
        let n = points.len();
        if n < self.min_points {
            return None;
        }

        let dims = self.kinds.len();
        let n_good = self.min_points.max(self.config.top_n_percent * n / 100);
        let n_bad = self
            .min_points
            .max((100 - self.config.top_n_percent.min(100)) * n / 100);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            losses[a]
                .partial_cmp(&losses[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // The bad set starts where the good set ends.
        let split = n_good.min(n);
        let good: Vec<Vec<f64>> = order[..split]
            .iter()
            .map(|&i| points[i].clone())
            .collect();
        let bad: Vec<Vec<f64>> = order[split..(n_good + n_bad).min(n)]
            .iter()
            .map(|&i| points[i].clone())
            .collect();
        if good.len() <= dims || bad.len() <= dims {
            return None;
        }

        Some((
            ProductKde::fit(good, &self.kinds, self.config.min_bandwidth),
            ProductKde::fit(bad, &self.kinds, self.config.min_bandwidth),
        ))
    }

    fn draw_candidate(&mut self, good: &ProductKde) -> Vec<f64> {
        let datum = &good.data()[self.rng.random_range(0..good.len())];
        self.kinds
            .iter()
            .enumerate()
            .map(|(d, kind)| {
                let bw = good.bandwidths()[d].max(self.config.min_bandwidth);
                match kind {
                    UnitKind::Continuous => {
                        truncated_normal(&mut self.rng, datum[d], bw * self.config.bandwidth_factor)
                    }
                    UnitKind::Categorical { choices } => {
                        if self.rng.random::<f64>() < 1.0 - bw {
                            datum[d]
                        } else {
                            self.rng.random_range(0..*choices) as f64
                        }
                    }
                }
            })
            .collect()
    }
}

fn same_budget(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

impl ConfigGenerator for BohbGenerator {
    fn get_config(&mut self, _budget: f64) -> HpoResult<Configuration> {
        let model_budget = self.model_budget();
        let explore = self.rng.random::<f64>() < self.config.random_fraction;

        let densities = match model_budget {
            Some(budget) if !explore => self
                .budgets
                .iter()
                .find(|b| same_budget(b.budget, budget))
                .and_then(|b| b.densities.clone()),
            _ => None,
        };
        let Some((good, bad)) = densities else {
            return Ok(self.space.sample(&mut self.rng));
        };

        let candidates: Vec<Vec<f64>> = (0..self.config.num_samples.max(1))
            .map(|_| self.draw_candidate(&good))
            .collect();

        let best = candidates
            .par_iter()
            .map(|candidate| {
                let l = good.pdf(candidate);
                let g = bad.pdf(candidate).max(1e-32);
                l / g
            })
            .enumerate()
            .filter(|(_, ratio)| ratio.is_finite())
            .reduce_with(|a, b| if b.1 > a.1 { b } else { a });

        match best {
            Some((idx, ratio)) => {
                debug!(budget = ?model_budget, ratio, "model-based suggestion");
                Ok(self.space.decode(&candidates[idx]))
            }
            None => Ok(self.space.sample(&mut self.rng)),
        }
    }

    fn new_result(&mut self, config: &Configuration, budget: f64, loss: f64) -> HpoResult<()> {
        let point = self.space.encode(config)?;
        let loss = if loss.is_finite() { loss } else { f64::INFINITY };

        let idx = match self
            .budgets
            .iter()
            .position(|b| same_budget(b.budget, budget))
        {
            Some(idx) => idx,
            None => {
                self.budgets.push(BudgetModel {
                    budget,
                    points: Vec::new(),
                    losses: Vec::new(),
                    densities: None,
                });
                self.budgets.len() - 1
            }
        };

        self.budgets[idx].points.push(point);
        self.budgets[idx].losses.push(loss);

        let densities = self.fit(&self.budgets[idx].points, &self.budgets[idx].losses);
        if densities.is_some() {
            self.budgets[idx].densities = densities;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "bohb"
    }
}
