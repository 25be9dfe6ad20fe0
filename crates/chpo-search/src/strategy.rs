//! Sequential search strategies: random sampling and TPE.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use chpo_types::{Configuration, HpoResult, SearchSpace, UnitKind};

use crate::parzen::ParzenEstimator;
use crate::trials::Trials;

/// Seeded generator, or one drawn from the OS when no seed is given.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// Common trait for sequential search strategies.
pub trait SearchStrategy: Send {
    /// Propose the next configuration given everything evaluated so far.
    fn suggest(&mut self, space: &SearchSpace, trials: &Trials) -> HpoResult<Configuration>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Which sequential strategy an adapter should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Random,
    #[default]
    Tpe,
}

impl StrategyKind {
    pub fn build(self, tpe: &TpeConfig, seed: Option<u64>) -> Box<dyn SearchStrategy> {
        match self {
            Self::Random => Box::new(RandomSearch::new(seed)),
            Self::Tpe => Box::new(TpeSearch::new(tpe.clone(), seed)),
        }
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: make_rng(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, space: &SearchSpace, _trials: &Trials) -> HpoResult<Configuration> {
        Ok(space.sample(&mut self.rng))
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- TPE ----

/// Tree-structured Parzen estimator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpeConfig {
    /// Fraction (scaled by `sqrt(n)`) of trials modelled as "good".
    pub gamma: f64,
    /// Upper bound on the size of the good set.
    pub gamma_cap: usize,
    /// Random suggestions before the model takes over.
    pub n_startup: usize,
    /// Candidates drawn from the good density per parameter.
    pub n_ei_candidates: usize,
    /// Weight of the prior component in every density.
    pub prior_weight: f64,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            gamma: 0.25,
            gamma_cap: 25,
            n_startup: 20,
            n_ei_candidates: 24,
            prior_weight: 1.0,
        }
    }
}

impl TpeConfig {
    pub fn with_startup(mut self, n: usize) -> Self {
        self.n_startup = n;
        self
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    /// Size of the good set for `n` completed trials.
    pub fn n_below(&self, n: usize) -> usize {
        let n_below = (self.gamma * (n as f64).sqrt()).ceil() as usize;
        n_below.min(self.gamma_cap).max(1).min(n)
    }
}

/// Tree-structured Parzen estimator search.
///
/// After `n_startup` random draws, completed trials are split by loss into a
/// good and a bad set, each parameter gets a Parzen density per set, and the
/// candidate maximising `l(x) / g(x)` is proposed.
#[derive(Debug, Clone)]
pub struct TpeSearch {
    config: TpeConfig,
    rng: StdRng,
}

impl TpeSearch {
    pub fn new(config: TpeConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: make_rng(seed),
        }
    }

    fn propose(
        &mut self,
        kind: UnitKind,
        below: &[f64],
        above: &[f64],
    ) -> f64 {
        let prior_weight = self.config.prior_weight;
        let (good, bad) = match kind {
            UnitKind::Continuous => (
                ParzenEstimator::continuous(below, prior_weight),
                ParzenEstimator::continuous(above, prior_weight),
            ),
            UnitKind::Categorical { choices } => (
                ParzenEstimator::categorical(below, choices, prior_weight),
                ParzenEstimator::categorical(above, choices, prior_weight),
            ),
        };

        let mut best = good.sample(&mut self.rng);
        let mut best_score = good.log_pdf(best) - bad.log_pdf(best);
        for _ in 1..self.config.n_ei_candidates.max(1) {
            let candidate = good.sample(&mut self.rng);
            let score = good.log_pdf(candidate) - bad.log_pdf(candidate);
            if score > best_score {
                best = candidate;
                best_score = score;
            }
        }
        best
    }
}

impl SearchStrategy for TpeSearch {
    fn suggest(&mut self, space: &SearchSpace, trials: &Trials) -> HpoResult<Configuration> {
        let mut observed: Vec<(Vec<f64>, f64)> = Vec::new();
        for (trial, loss) in trials.completed() {
            observed.push((space.encode(&trial.configuration)?, loss));
        }

        if observed.len() < self.config.n_startup || observed.is_empty() {
            return Ok(space.sample(&mut self.rng));
        }

        observed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let n_below = self.config.n_below(observed.len());
        let (good, bad) = observed.split_at(n_below);

        let point: Vec<f64> = space
            .unit_kinds()
            .into_iter()
            .enumerate()
            .map(|(dim, kind)| {
                let below: Vec<f64> = good.iter().map(|(p, _)| p[dim]).collect();
                let above: Vec<f64> = bad.iter().map(|(p, _)| p[dim]).collect();
                self.propose(kind, &below, &above)
            })
            .collect();

        Ok(space.decode(&point))
    }

    fn name(&self) -> &str {
        "tpe"
    }
}
