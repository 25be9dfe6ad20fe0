//! Integration tests for the bandit adapters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chpo_adapters::{
    bandit_search, bayesian_bandit_search, AdapterConfig, BanditKind, BanditSearch,
    Configuration, DispatchError, DispatchEvent, Endpoint, HpoError, HpoResult, LifecycleState,
    Objective, SearchSpace, Split,
};

#[derive(Default)]
struct Counted {
    validation: AtomicUsize,
    test: AtomicUsize,
}

fn constant(_: &Configuration, _: f64, counted: &Counted, split: Split) -> f64 {
    match split {
        Split::Validation => counted.validation.fetch_add(1, Ordering::SeqCst),
        Split::Test => counted.test.fetch_add(1, Ordering::SeqCst),
    };
    0.25
}

fn budget_scaled(config: &Configuration, budget: f64, _: &(), _: Split) -> f64 {
    (config["x"].as_f64().unwrap() - 0.5).abs() + 1.0 / budget
}

fn unit_space() -> SearchSpace {
    SearchSpace::new().add_float("x", 0.0, 1.0)
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct Diverges;

impl Objective<()> for Diverges {
    fn evaluate(&self, _: &Configuration, _: f64, _: &(), _: Split) -> HpoResult<f64> {
        Err(HpoError::objective("loss diverged"))
    }
}

#[tokio::test]
async fn hyperband_returns_constant_and_tests_once() {
    let counted = Arc::new(Counted::default());
    let loss = bandit_search(&unit_space(), Arc::new(constant), Arc::clone(&counted), 3, 9.0, 3.0)
        .await
        .unwrap();

    assert_eq!(loss, 0.25);
    // brackets of 9+3+1, 3+1 and 3 evaluations
    assert_eq!(counted.validation.load(Ordering::SeqCst), 20);
    assert_eq!(counted.test.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bohb_returns_constant_and_tests_once() {
    let counted = Arc::new(Counted::default());
    let loss =
        bayesian_bandit_search(&unit_space(), Arc::new(constant), Arc::clone(&counted), 3, 9.0, 3.0)
            .await
            .unwrap();

    assert_eq!(loss, 0.25);
    assert_eq!(counted.validation.load(Ordering::SeqCst), 20);
    assert_eq!(counted.test.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lifecycle_runs_to_shutdown() {
    let search = BanditSearch::new(BanditKind::Hyperband, AdapterConfig::default().with_seed(1));
    let report = search
        .run_detailed(&unit_space(), Arc::new(budget_scaled), Arc::new(()), 2, 9.0, 3.0)
        .await
        .unwrap();

    assert_eq!(
        report.transitions,
        vec![
            LifecycleState::Idle,
            LifecycleState::CoordinatorStarted,
            LifecycleState::WorkerAttached,
            LifecycleState::SchedulerRunning,
            LifecycleState::ResultCollected,
            LifecycleState::Shutdown,
        ]
    );
    assert_eq!(report.result.runs.len(), 13 + 4);
}

#[tokio::test]
async fn incumbent_is_best_at_max_budget_and_scored_on_test() {
    let search = BanditSearch::new(BanditKind::Bohb, AdapterConfig::default().with_seed(5));
    let report = search
        .run_detailed(&unit_space(), Arc::new(budget_scaled), Arc::new(()), 4, 9.0, 3.0)
        .await
        .unwrap();

    let best_at_max = report
        .result
        .runs
        .iter()
        .filter(|run| run.budget == 9.0)
        .map(|run| run.loss)
        .fold(f64::INFINITY, f64::min);
    let expected = budget_scaled(&report.incumbent, 9.0, &(), Split::Test);

    assert_eq!(report.test_loss, expected);
    assert_eq!(report.test_loss, best_at_max);
}

#[tokio::test]
async fn port_can_be_rebound_after_the_call() {
    let port = free_port();
    let config = AdapterConfig::default().with_endpoint(Endpoint::default().with_port(port));
    let search = BanditSearch::new(BanditKind::Hyperband, config);

    for _ in 0..2 {
        let loss = search
            .run(&unit_space(), Arc::new(budget_scaled), Arc::new(()), 1, 3.0, 3.0)
            .await
            .unwrap();
        assert!(loss.is_finite());
    }

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
    assert!(listener.is_ok(), "port {port} still held");
}

#[tokio::test]
async fn bind_failure_fails_the_call() {
    let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = held.local_addr().unwrap().port();

    let config = AdapterConfig::default().with_endpoint(Endpoint::default().with_port(port));
    let counted = Arc::new(Counted::default());
    let err = BanditSearch::new(BanditKind::Bohb, config)
        .run(&unit_space(), Arc::new(constant), Arc::clone(&counted), 1, 9.0, 3.0)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        HpoError::Dispatch(DispatchError::BindFailed { .. })
    ));
    assert_eq!(counted.validation.load(Ordering::SeqCst), 0);
    drop(held);
}

#[tokio::test]
async fn objective_errors_propagate() {
    let err = bandit_search(&unit_space(), Arc::new(Diverges), Arc::new(()), 1, 9.0, 3.0)
        .await
        .unwrap_err();

    match err {
        HpoError::Dispatch(DispatchError::RemoteEvaluation { message, .. }) => {
            assert!(message.contains("loss diverged"), "{message}");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn coordinator_events_are_forwarded() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let search = BanditSearch::new(BanditKind::Hyperband, AdapterConfig::default().with_seed(2))
        .with_events(tx);
    let report = search
        .run_detailed(&unit_space(), Arc::new(budget_scaled), Arc::new(()), 1, 9.0, 3.0)
        .await
        .unwrap();

    let events: Vec<DispatchEvent> = rx.try_iter().collect();
    let dispatched = events
        .iter()
        .filter(|e| matches!(e, DispatchEvent::JobDispatched { .. }))
        .count();
    assert_eq!(dispatched, report.result.runs.len());
    assert!(matches!(events.first(), Some(DispatchEvent::Listening { .. })));
    assert_eq!(events.last(), Some(&DispatchEvent::Shutdown));
}
