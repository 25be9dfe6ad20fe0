//! Tune a noisy two-parameter quadratic with every adapter.
//!
//! Run with `RUST_LOG=chpo_adapters=info,chpo_dispatch=debug` to follow the
//! coordinator lifecycle.

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use chpo_adapters::{
    bandit_search, bayesian_bandit_search, sequential_search, Configuration, SearchSpace, Split,
    StagedSequentialSearch,
};

/// The "dataset": an optimum and how much a split shifts it.
struct Quadratic {
    optimum: (f64, f64),
    test_shift: f64,
}

fn loss(config: &Configuration, budget: f64, problem: &Quadratic, split: Split) -> f64 {
    let x = config["x"].as_f64().unwrap_or_default();
    let depth = config["depth"].as_f64().unwrap_or_default();
    let shift = match split {
        Split::Validation => 0.0,
        Split::Test => problem.test_shift,
    };
    // More budget means a less noisy estimate.
    (x - problem.optimum.0 - shift).powi(2) + (depth - problem.optimum.1).powi(2) / 10.0
        + 1.0 / budget.max(1.0)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let space = SearchSpace::new()
        .add_float("x", -2.0, 2.0)
        .add_int("depth", 1, 8);
    let problem = Quadratic {
        optimum: (0.7, 4.0),
        test_shift: 0.05,
    };

    let sequential = sequential_search(&space, &loss, &problem, 60, 9.0)?;
    println!("sequential search test loss: {sequential:.4}");

    let staged = StagedSequentialSearch::new(&space, &loss, &problem, 3).run(30, 9.0)?;
    println!("staged search test loss:     {staged:.4}");

    let objective = Arc::new(loss);
    let problem = Arc::new(problem);

    let hyperband = bandit_search(
        &space,
        Arc::clone(&objective),
        Arc::clone(&problem),
        6,
        27.0,
        3.0,
    )
    .await?;
    println!("hyperband test loss:         {hyperband:.4}");

    let bohb = bayesian_bandit_search(&space, objective, problem, 6, 27.0, 3.0).await?;
    println!("bohb test loss:              {bohb:.4}");

    Ok(())
}
