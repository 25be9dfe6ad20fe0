//! Hyperband bracket planning.
//!
//! Based on Li et al. (2018) - Hyperband: A Novel Bandit-Based Approach,
//! in the geometric-budget formulation used by BOHB (Falkner et al., 2018).

use serde::{Deserialize, Serialize};

use chpo_types::{HpoResult, ScheduleError};

/// One successive-halving run: stage `j` evaluates `num_configs[j]`
/// configurations at `budgets[j]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    pub num_configs: Vec<usize>,
    pub budgets: Vec<f64>,
}

impl Bracket {
    pub fn stages(&self) -> usize {
        self.budgets.len()
    }

    /// Total evaluations the bracket performs.
    pub fn evaluations(&self) -> usize {
        self.num_configs.iter().sum()
    }
}

/// Budget ladder and bracket sizes for a Hyperband run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperbandPlan {
    min_budget: f64,
    max_budget: f64,
    eta: f64,
    max_sh_iter: usize,
    budgets: Vec<f64>,
}

impl HyperbandPlan {
    pub fn new(min_budget: f64, max_budget: f64, eta: f64) -> HpoResult<Self> {
        if !(min_budget > 0.0 && max_budget.is_finite() && min_budget <= max_budget) {
            return Err(ScheduleError::InvalidBudgets {
                min_budget,
                max_budget,
            }
            .into());
        }
        if !(eta > 1.0 && eta.is_finite()) {
            return Err(ScheduleError::InvalidEta { eta }.into());
        }

        let rungs = (-(min_budget / max_budget).ln() / eta.ln()).floor();
        let max_sh_iter = rungs as usize + 1;
        let budgets = (0..max_sh_iter)
            .map(|k| max_budget / eta.powi((max_sh_iter - 1 - k) as i32))
            .collect();

        Ok(Self {
            min_budget,
            max_budget,
            eta,
            max_sh_iter,
            budgets,
        })
    }

    pub fn max_budget(&self) -> f64 {
        self.max_budget
    }

    /// Number of rungs in the most aggressive bracket.
    pub fn max_sh_iter(&self) -> usize {
        self.max_sh_iter
    }

    /// The full budget ladder, ascending, ending at `max_budget`.
    pub fn budgets(&self) -> &[f64] {
        &self.budgets
    }

    /// Bracket for the given (0-based) Hyperband iteration. Iterations cycle
    /// from the most aggressive bracket down to a single full-budget stage.
    pub fn bracket(&self, iteration: usize) -> Bracket {
        let s = self.max_sh_iter - 1 - (iteration % self.max_sh_iter);
        let n0 = ((self.max_sh_iter / (s + 1)) as f64 * self.eta.powi(s as i32)).trunc();
        let num_configs = (0..=s)
            .map(|i| ((n0 / self.eta.powi(i as i32)) as usize).max(1))
            .collect();
        let budgets = self.budgets[self.max_sh_iter - 1 - s..].to_vec();

        Bracket {
            num_configs,
            budgets,
        }
    }
}
