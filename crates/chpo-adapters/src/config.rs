//! Settings shared by the adapters.

use serde::{Deserialize, Serialize};
use std::path::Path;

use chpo_dispatch::Endpoint;
use chpo_search::{BohbConfig, StrategyKind, TpeConfig};
use chpo_types::{config_error, HpoResult};

/// Everything an adapter needs besides the space, objective and problem.
///
/// Every field has a default, so a JSON document only has to name what it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Strategy for the sequential adapters.
    pub strategy: StrategyKind,
    pub tpe: TpeConfig,
    pub bohb: BohbConfig,
    /// Coordinator address for the bandit adapters.
    pub endpoint: Endpoint,
    /// Run identifier workers must present; a fresh one is generated per
    /// call when unset.
    pub run_id: Option<String>,
    /// Smallest budget in the Hyperband ladder.
    pub min_budget: f64,
    /// Seed for every random choice the search makes.
    pub seed: Option<u64>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            tpe: TpeConfig::default(),
            bohb: BohbConfig::default(),
            endpoint: Endpoint::default(),
            run_id: None,
            min_budget: 1.0,
            seed: None,
        }
    }
}

impl AdapterConfig {
    /// Defaults, with the coordinator address taken from
    /// `CHPO_COORDINATOR_ADDR` when set.
    pub fn from_env() -> HpoResult<Self> {
        Ok(Self {
            endpoint: Endpoint::from_env()?,
            ..Self::default()
        })
    }

    pub fn from_json_str(json: &str) -> HpoResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| config_error!("invalid adapter config: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> HpoResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read {}: {e}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> HpoResult<()> {
        if !(self.min_budget > 0.0 && self.min_budget.is_finite()) {
            return Err(config_error!("min_budget must be positive, got {}", self.min_budget));
        }
        if !(self.tpe.gamma > 0.0 && self.tpe.gamma <= 1.0) {
            return Err(config_error!("tpe.gamma must be in (0, 1], got {}", self.tpe.gamma));
        }
        if self.bohb.top_n_percent == 0 || self.bohb.top_n_percent >= 100 {
            return Err(config_error!(
                "bohb.top_n_percent must be in 1..100, got {}",
                self.bohb.top_n_percent
            ));
        }
        Ok(())
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_tpe(mut self, tpe: TpeConfig) -> Self {
        self.tpe = tpe;
        self
    }

    pub fn with_bohb(mut self, bohb: BohbConfig) -> Self {
        self.bohb = bohb;
        self
    }

    pub fn with_min_budget(mut self, min_budget: f64) -> Self {
        self.min_budget = min_budget;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}
