//! Successive-halving brackets driven one job at a time.
//!
//! [`BanditScheduler`] hands out `(configuration, budget)` jobs and consumes
//! their losses. It knows nothing about where jobs run, so a caller can feed
//! it from a local loop or from a remote worker pool.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};
use uuid::Uuid;

use chpo_types::{Configuration, HpoResult, ScheduleError};

use crate::generator::ConfigGenerator;
use crate::hyperband::{Bracket, HyperbandPlan};

/// Identifies a configuration by the iteration that sampled it and its
/// position within that iteration's first stage.
///
/// Serializes as its `"(iteration, index)"` display form so it can key JSON
/// maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigId {
    pub iteration: usize,
    pub index: usize,
}

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.iteration, self.index)
    }
}

impl std::str::FromStr for ConfigId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || format!("malformed config id {s:?}");
        let (iteration, index) = s
            .trim()
            .strip_prefix('(')
            .and_then(|inner| inner.strip_suffix(')'))
            .and_then(|inner| inner.split_once(','))
            .ok_or_else(malformed)?;
        Ok(Self {
            iteration: iteration.trim().parse().map_err(|_| malformed())?,
            index: index.trim().parse().map_err(|_| malformed())?,
        })
    }
}

impl Serialize for ConfigId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConfigId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One evaluation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub config_id: ConfigId,
    pub configuration: Configuration,
    pub budget: f64,
}

/// One finished evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub job_id: Uuid,
    pub config_id: ConfigId,
    pub budget: f64,
    pub loss: f64,
}

/// What the scheduler wants next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Run(Job),
    /// Jobs are in flight and nothing else can start until they report.
    Wait,
    Finished,
}

/// Everything a finished bandit search evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanditResult {
    pub max_budget: f64,
    pub configs: HashMap<ConfigId, Configuration>,
    pub runs: Vec<Run>,
}

impl BanditResult {
    fn at_max_budget(&self, budget: f64) -> bool {
        (budget - self.max_budget).abs() <= 1e-9 * self.max_budget.abs().max(1.0)
    }

    /// Configuration with the lowest loss among those evaluated at the
    /// maximum budget.
    pub fn incumbent_id(&self) -> Option<ConfigId> {
        self.runs
            .iter()
            .filter(|run| self.at_max_budget(run.budget) && !run.loss.is_nan())
            .min_by(|a, b| a.loss.partial_cmp(&b.loss).unwrap_or(std::cmp::Ordering::Equal))
            .map(|run| run.config_id)
    }

    pub fn incumbent(&self) -> HpoResult<&Configuration> {
        self.incumbent_id()
            .and_then(|id| self.configs.get(&id))
            .ok_or_else(|| {
                ScheduleError::NoIncumbent {
                    max_budget: self.max_budget,
                }
                .into()
            })
    }

    /// Number of evaluations run at `budget`.
    pub fn runs_at(&self, budget: f64) -> usize {
        self.runs
            .iter()
            .filter(|run| (run.budget - budget).abs() <= 1e-9 * budget.abs().max(1.0))
            .count()
    }
}

#[derive(Debug)]
struct BracketRun {
    iteration: usize,
    bracket: Bracket,
    stage: usize,
    sampled: usize,
    /// Configurations taking part in the current stage.
    active: Vec<ConfigId>,
    queue: VecDeque<ConfigId>,
    losses: HashMap<ConfigId, f64>,
}

impl BracketRun {
    fn new(iteration: usize, bracket: Bracket) -> Self {
        Self {
            iteration,
            bracket,
            stage: 0,
            sampled: 0,
            active: Vec::new(),
            queue: VecDeque::new(),
            losses: HashMap::new(),
        }
    }

    fn budget(&self) -> f64 {
        self.bracket.budgets[self.stage]
    }

    fn stage_complete(&self, in_flight: usize) -> bool {
        let all_sampled = self.stage > 0 || self.sampled >= self.bracket.num_configs[0];
        all_sampled && self.queue.is_empty() && in_flight == 0
            && self.losses.len() == self.active.len()
    }

    /// Keep the best `num_configs[stage + 1]` of the current stage.
    fn advance(&mut self) {
        let keep = self.bracket.num_configs[self.stage + 1];
        let mut ranked: Vec<(ConfigId, f64)> = self
            .active
            .iter()
            .map(|id| {
                let loss = self.losses.get(id).copied().unwrap_or(f64::INFINITY);
                (*id, if loss.is_nan() { f64::INFINITY } else { loss })
            })
            .collect();
        ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        self.active = ranked.into_iter().take(keep).map(|(id, _)| id).collect();
        self.queue = self.active.iter().copied().collect();
        self.losses.clear();
        self.stage += 1;
    }
}

/// Runs `n_iterations` Hyperband brackets, sampling first-stage
/// configurations from a [`ConfigGenerator`].
pub struct BanditScheduler {
    plan: HyperbandPlan,
    generator: Box<dyn ConfigGenerator>,
    n_iterations: usize,
    next_iteration: usize,
    current: Option<BracketRun>,
    in_flight: HashMap<Uuid, (ConfigId, f64)>,
    result: BanditResult,
}

impl BanditScheduler {
    pub fn new(
        plan: HyperbandPlan,
        generator: Box<dyn ConfigGenerator>,
        n_iterations: usize,
    ) -> Self {
        let max_budget = plan.max_budget();
        Self {
            plan,
            generator,
            n_iterations,
            next_iteration: 0,
            current: None,
            in_flight: HashMap::new(),
            result: BanditResult {
                max_budget,
                configs: HashMap::new(),
                runs: Vec::new(),
            },
        }
    }

    /// Jobs handed out but not yet reported.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn next_step(&mut self) -> HpoResult<Step> {
        loop {
            let Some(run) = self.current.as_mut() else {
                if self.next_iteration >= self.n_iterations {
                    return Ok(Step::Finished);
                }
                let bracket = self.plan.bracket(self.next_iteration);
                info!(
                    iteration = self.next_iteration,
                    num_configs = ?bracket.num_configs,
                    budgets = ?bracket.budgets,
                    "starting bracket"
                );
                self.current = Some(BracketRun::new(self.next_iteration, bracket));
                self.next_iteration += 1;
                continue;
            };

            if run.stage == 0 && run.sampled < run.bracket.num_configs[0] {
                let budget = run.budget();
                let config_id = ConfigId {
                    iteration: run.iteration,
                    index: run.sampled,
                };
                run.sampled += 1;
                run.active.push(config_id);

                let configuration = self.generator.get_config(budget)?;
                self.result.configs.insert(config_id, configuration.clone());
                return Ok(Step::Run(self.issue(config_id, configuration, budget)));
            }

            if let Some(config_id) = run.queue.pop_front() {
                let budget = run.budget();
                let configuration = self.result.configs[&config_id].clone();
                return Ok(Step::Run(self.issue(config_id, configuration, budget)));
            }

            if !run.stage_complete(self.in_flight.len()) {
                return Ok(Step::Wait);
            }

            if run.stage + 1 < run.bracket.stages() {
                run.advance();
                debug!(
                    iteration = run.iteration,
                    stage = run.stage,
                    budget = run.budget(),
                    promoted = run.active.len(),
                    "advancing stage"
                );
            } else {
                debug!(iteration = run.iteration, "bracket finished");
                self.current = None;
            }
        }
    }

    fn issue(&mut self, config_id: ConfigId, configuration: Configuration, budget: f64) -> Job {
        let job = Job {
            id: Uuid::new_v4(),
            config_id,
            configuration,
            budget,
        };
        self.in_flight.insert(job.id, (config_id, budget));
        job
    }

    pub fn register_result(&mut self, job_id: Uuid, loss: f64) -> HpoResult<()> {
        let (config_id, budget) =
            self.in_flight
                .remove(&job_id)
                .ok_or_else(|| ScheduleError::UnknownJob {
                    job: job_id.to_string(),
                })?;

        if let Some(run) = self.current.as_mut() {
            if run.iteration == config_id.iteration {
                run.losses.insert(config_id, loss);
            }
        }

        self.generator
            .new_result(&self.result.configs[&config_id], budget, loss)?;
        self.result.runs.push(Run {
            job_id,
            config_id,
            budget,
            loss,
        });
        Ok(())
    }

    pub fn into_result(self) -> BanditResult {
        self.result
    }
}
