//! Objective functions and the evaluator seam used by workers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::HpoResult;
use crate::space::Configuration;

/// Data partition an objective is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Validation,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller-supplied loss over `(configuration, budget, problem, split)`.
///
/// Plain closures returning `f64` are objectives; implement the trait directly
/// when evaluation can fail.
pub trait Objective<P: ?Sized> {
    fn evaluate(
        &self,
        config: &Configuration,
        budget: f64,
        problem: &P,
        split: Split,
    ) -> HpoResult<f64>;
}

impl<P: ?Sized, F> Objective<P> for F
where
    F: Fn(&Configuration, f64, &P, Split) -> f64,
{
    fn evaluate(
        &self,
        config: &Configuration,
        budget: f64,
        problem: &P,
        split: Split,
    ) -> HpoResult<f64> {
        Ok(self(config, budget, problem, split))
    }
}

/// Scores one configuration at one budget. This is the only thing a worker
/// needs to know about the problem being tuned.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, config: &Configuration, budget: f64) -> HpoResult<f64>;
}

/// Binds an objective and a problem instance to the validation split.
pub struct ObjectiveEvaluator<O: ?Sized, P: ?Sized> {
    objective: Arc<O>,
    problem: Arc<P>,
}

impl<O: ?Sized, P: ?Sized> ObjectiveEvaluator<O, P> {
    pub fn new(objective: Arc<O>, problem: Arc<P>) -> Self {
        Self { objective, problem }
    }
}

impl<O, P> Evaluator for ObjectiveEvaluator<O, P>
where
    O: Objective<P> + Send + Sync + ?Sized,
    P: Send + Sync + ?Sized,
{
    fn evaluate(&self, config: &Configuration, budget: f64) -> HpoResult<f64> {
        Objective::evaluate(
            &*self.objective,
            config,
            budget,
            &*self.problem,
            Split::Validation,
        )
    }
}
