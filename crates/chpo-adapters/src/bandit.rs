//! Bandit adapters: Hyperband and BOHB driven through an in-process
//! coordinator and a single worker.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chpo_dispatch::{Coordinator, DispatchEvent, JobDescriptor, Worker};
use chpo_search::{
    BanditResult, BanditScheduler, BohbGenerator, ConfigGenerator, HyperbandPlan, RandomSampling,
    Step,
};
use chpo_types::{
    internal_error, Configuration, Evaluator, HpoResult, Objective, ObjectiveEvaluator,
    SearchSpace, Split,
};

use crate::config::AdapterConfig;

/// How long to wait for the worker to register before giving up.
const WORKER_ATTACH_TIMEOUT: Duration = Duration::from_secs(30);

/// Phases of one bandit search call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    CoordinatorStarted,
    WorkerAttached,
    SchedulerRunning,
    ResultCollected,
    Shutdown,
}

/// Where first-stage configurations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanditKind {
    /// Uniform sampling (plain Hyperband).
    #[default]
    Hyperband,
    /// Density-model suggestions (BOHB).
    Bohb,
}

/// Everything a bandit search produced, beyond the test loss.
#[derive(Debug, Clone)]
pub struct BanditReport {
    pub run_id: String,
    pub test_loss: f64,
    pub incumbent: Configuration,
    pub result: BanditResult,
    /// Lifecycle states entered, in order.
    pub transitions: Vec<LifecycleState>,
}

struct Lifecycle<'a> {
    run_id: &'a str,
    state: LifecycleState,
    history: Vec<LifecycleState>,
}

impl<'a> Lifecycle<'a> {
    fn new(run_id: &'a str) -> Self {
        Self {
            run_id,
            state: LifecycleState::Idle,
            history: vec![LifecycleState::Idle],
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        info!(run_id = %self.run_id, from = ?self.state, to = ?next, "bandit search lifecycle");
        self.state = next;
        self.history.push(next);
    }
}

/// Run `n_parent` Hyperband iterations with budgets from `1` to `n_base` and
/// reduction factor `eta`, then score the incumbent once on the test split
/// at budget `n_base`.
pub async fn bandit_search<O, P>(
    space: &SearchSpace,
    objective: Arc<O>,
    problem: Arc<P>,
    n_parent: usize,
    n_base: f64,
    eta: f64,
) -> HpoResult<f64>
where
    O: Objective<P> + Send + Sync + ?Sized + 'static,
    P: Send + Sync + ?Sized + 'static,
{
    BanditSearch::new(BanditKind::Hyperband, AdapterConfig::from_env()?)
        .run(space, objective, problem, n_parent, n_base, eta)
        .await
}

/// Like [`bandit_search`], with BOHB proposing the first-stage
/// configurations of every bracket.
pub async fn bayesian_bandit_search<O, P>(
    space: &SearchSpace,
    objective: Arc<O>,
    problem: Arc<P>,
    n_parent: usize,
    n_base: f64,
    eta: f64,
) -> HpoResult<f64>
where
    O: Objective<P> + Send + Sync + ?Sized + 'static,
    P: Send + Sync + ?Sized + 'static,
{
    BanditSearch::new(BanditKind::Bohb, AdapterConfig::from_env()?)
        .run(space, objective, problem, n_parent, n_base, eta)
        .await
}

/// Configurable bandit search.
pub struct BanditSearch {
    kind: BanditKind,
    config: AdapterConfig,
    events: Option<Sender<DispatchEvent>>,
}

impl BanditSearch {
    pub fn new(kind: BanditKind, config: AdapterConfig) -> Self {
        Self {
            kind,
            config,
            events: None,
        }
    }

    /// Forward coordinator events to `events`.
    pub fn with_events(mut self, events: Sender<DispatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub async fn run<O, P>(
        &self,
        space: &SearchSpace,
        objective: Arc<O>,
        problem: Arc<P>,
        n_parent: usize,
        n_base: f64,
        eta: f64,
    ) -> HpoResult<f64>
    where
        O: Objective<P> + Send + Sync + ?Sized + 'static,
        P: Send + Sync + ?Sized + 'static,
    {
        self.run_detailed(space, objective, problem, n_parent, n_base, eta)
            .await
            .map(|report| report.test_loss)
    }

    pub async fn run_detailed<O, P>(
        &self,
        space: &SearchSpace,
        objective: Arc<O>,
        problem: Arc<P>,
        n_parent: usize,
        n_base: f64,
        eta: f64,
    ) -> HpoResult<BanditReport>
    where
        O: Objective<P> + Send + Sync + ?Sized + 'static,
        P: Send + Sync + ?Sized + 'static,
    {
        space.validate()?;
        let plan = HyperbandPlan::new(self.config.min_budget, n_base, eta)?;
        let generator = self.generator(space);

        let run_id = self
            .config
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut lifecycle = Lifecycle::new(&run_id);

        info!(
            run_id = %run_id,
            generator = generator.name(),
            n_parent,
            n_base,
            eta,
            "starting bandit search"
        );

        let coordinator =
            Coordinator::start(&self.config.endpoint, run_id.as_str(), self.events.clone()).await?;
        lifecycle.advance(LifecycleState::CoordinatorStarted);

        let evaluator: Arc<dyn Evaluator> = Arc::new(ObjectiveEvaluator::new(
            Arc::clone(&objective),
            Arc::clone(&problem),
        ));
        let worker = Worker::new(run_id.as_str(), evaluator).spawn(coordinator.local_addr());

        if let Err(e) = coordinator.wait_for_workers(1, WORKER_ATTACH_TIMEOUT).await {
            if worker.is_finished() {
                worker.join().await?;
            } else {
                worker.abort();
            }
            return Err(e);
        }
        lifecycle.advance(LifecycleState::WorkerAttached);

        let mut scheduler = BanditScheduler::new(plan, generator, n_parent);
        lifecycle.advance(LifecycleState::SchedulerRunning);

        let collected = match drive(&coordinator, &mut scheduler).await {
            Ok(()) => collect(scheduler),
            Err(e) => Err(e),
        };
        if collected.is_ok() {
            lifecycle.advance(LifecycleState::ResultCollected);
        }

        coordinator.shutdown().await;
        let worker_result = worker.join().await;
        lifecycle.advance(LifecycleState::Shutdown);

        let (result, incumbent) = collected?;
        let jobs = worker_result?;
        debug!(run_id = %run_id, jobs, "worker finished");

        let test_loss = evaluate_on_test(objective, problem, incumbent.clone(), n_base).await?;
        info!(
            run_id = %run_id,
            evaluations = result.runs.len(),
            test_loss,
            "bandit search finished"
        );

        let transitions = lifecycle.history;
        Ok(BanditReport {
            run_id,
            test_loss,
            incumbent,
            result,
            transitions,
        })
    }

    fn generator(&self, space: &SearchSpace) -> Box<dyn ConfigGenerator> {
        match self.kind {
            BanditKind::Hyperband => {
                Box::new(RandomSampling::new(space.clone(), self.config.seed))
            }
            BanditKind::Bohb => Box::new(BohbGenerator::new(
                space.clone(),
                self.config.bohb.clone(),
                self.config.seed,
            )),
        }
    }
}

/// Feed every scheduled job through the coordinator, one at a time.
async fn drive(coordinator: &Coordinator, scheduler: &mut BanditScheduler) -> HpoResult<()> {
    loop {
        match scheduler.next_step()? {
            Step::Run(job) => {
                let job_id = job.id;
                let loss = coordinator
                    .submit(JobDescriptor {
                        job_id,
                        config_id: job.config_id.to_string(),
                        configuration: job.configuration,
                        budget: job.budget,
                    })
                    .await?;
                scheduler.register_result(job_id, loss)?;
            }
            Step::Wait => {
                warn!(in_flight = scheduler.in_flight(), "scheduler stalled");
                return Err(internal_error!("scheduler is waiting but no job is running"));
            }
            Step::Finished => return Ok(()),
        }
    }
}

fn collect(scheduler: BanditScheduler) -> HpoResult<(BanditResult, Configuration)> {
    let result = scheduler.into_result();
    let incumbent = result.incumbent()?.clone();
    Ok((result, incumbent))
}

async fn evaluate_on_test<O, P>(
    objective: Arc<O>,
    problem: Arc<P>,
    incumbent: Configuration,
    budget: f64,
) -> HpoResult<f64>
where
    O: Objective<P> + Send + Sync + ?Sized + 'static,
    P: Send + Sync + ?Sized + 'static,
{
    tokio::task::spawn_blocking(move || {
        Objective::evaluate(&*objective, &incumbent, budget, &*problem, Split::Test)
    })
    .await
    .map_err(|e| internal_error!("test evaluation task failed: {e}"))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lifecycle_states() -> Vec<LifecycleState> {
        let mut lifecycle = Lifecycle::new("run");
        lifecycle.advance(LifecycleState::CoordinatorStarted);
        lifecycle.advance(LifecycleState::WorkerAttached);
        lifecycle.history
    }

    #[test]
    fn lifecycle_starts_idle() {
        assert_eq!(
            lifecycle_states(),
            vec![
                LifecycleState::Idle,
                LifecycleState::CoordinatorStarted,
                LifecycleState::WorkerAttached
            ]
        );
    }

    #[test]
    fn generator_follows_kind() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let hyperband = BanditSearch::new(BanditKind::Hyperband, AdapterConfig::default());
        let bohb = BanditSearch::new(BanditKind::Bohb, AdapterConfig::default());
        assert_eq!(hyperband.generator(&space).name(), "random_sampling");
        assert_eq!(bohb.generator(&space).name(), "bohb");
    }

    #[tokio::test]
    async fn invalid_eta_fails_before_binding() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let objective = Arc::new(|_: &Configuration, _: f64, _: &(), _: Split| 0.0);
        let err = bandit_search(&space, objective, Arc::new(()), 1, 9.0, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, chpo_types::HpoError::Schedule(_)));
    }
}
