//! Minimise a loss over a search space with a sequential strategy.

use tracing::debug;

use chpo_types::{validation_error, Configuration, HpoResult, SearchSpace};

use crate::strategy::SearchStrategy;
use crate::trials::{Trial, Trials};

/// Evaluate suggestions until `trials` holds `max_evals` records, then return
/// the best configuration in the whole history.
///
/// Trials already present count toward `max_evals`, so calling `fmin` again
/// with a larger target extends an earlier search instead of restarting it.
/// An objective error is recorded on its trial and returned immediately.
pub fn fmin<F>(
    mut objective: F,
    space: &SearchSpace,
    max_evals: usize,
    strategy: &mut dyn SearchStrategy,
    trials: &mut Trials,
) -> HpoResult<Configuration>
where
    F: FnMut(&Configuration) -> HpoResult<f64>,
{
    space.validate()?;

    while trials.len() < max_evals {
        let configuration = strategy.suggest(space, trials)?;
        let mut trial = Trial::new(trials.len(), configuration);
        trial.mark_running();

        match objective(&trial.configuration) {
            Ok(loss) => {
                debug!(
                    strategy = strategy.name(),
                    trial = trial.trial_number,
                    loss,
                    "trial completed"
                );
                trial.mark_completed(loss);
                trials.push(trial);
            }
            Err(e) => {
                trial.mark_failed(e.to_string());
                trials.push(trial);
                return Err(e);
            }
        }
    }

    trials
        .best()
        .map(|trial| trial.configuration.clone())
        .ok_or_else(|| validation_error!("no completed trials to take the minimum of"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{RandomSearch, TpeConfig, TpeSearch};
    use crate::trials::TrialStatus;
    use chpo_types::HpoError;

    fn unit_space() -> SearchSpace {
        SearchSpace::new().add_float("x", 0.0, 1.0)
    }

    fn distance(config: &Configuration) -> HpoResult<f64> {
        Ok((config["x"].as_f64().unwrap_or_default() - 0.5).abs())
    }

    #[test]
    fn runs_exactly_max_evals() {
        let mut strategy = RandomSearch::new(Some(0));
        let mut trials = Trials::new();
        let mut calls = 0;
        fmin(
            |c| {
                calls += 1;
                distance(c)
            },
            &unit_space(),
            12,
            &mut strategy,
            &mut trials,
        )
        .unwrap();
        assert_eq!(calls, 12);
        assert_eq!(trials.len(), 12);
    }

    #[test]
    fn continues_existing_history() {
        let mut strategy = RandomSearch::new(Some(0));
        let mut trials = Trials::new();
        fmin(distance, &unit_space(), 5, &mut strategy, &mut trials).unwrap();
        fmin(distance, &unit_space(), 8, &mut strategy, &mut trials).unwrap();
        assert_eq!(trials.len(), 8);

        // A target already reached runs nothing.
        let mut calls = 0;
        fmin(
            |c| {
                calls += 1;
                distance(c)
            },
            &unit_space(),
            3,
            &mut strategy,
            &mut trials,
        )
        .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn returns_argmin_of_history() {
        let mut strategy = TpeSearch::new(TpeConfig::default(), Some(2));
        let mut trials = Trials::new();
        let best = fmin(distance, &unit_space(), 30, &mut strategy, &mut trials).unwrap();

        let best_loss = distance(&best).unwrap();
        for (_, loss) in trials.completed() {
            assert!(best_loss <= loss);
        }
    }

    #[test]
    fn objective_error_aborts_and_is_recorded() {
        let mut strategy = RandomSearch::new(Some(0));
        let mut trials = Trials::new();
        let mut calls = 0;
        let err = fmin(
            |_| {
                calls += 1;
                if calls == 3 {
                    Err(HpoError::objective("nan gradient"))
                } else {
                    Ok(1.0)
                }
            },
            &unit_space(),
            10,
            &mut strategy,
            &mut trials,
        )
        .unwrap_err();

        assert!(err.to_string().contains("nan gradient"));
        assert_eq!(trials.len(), 3);
        assert_eq!(trials.iter().last().unwrap().status, TrialStatus::Failed);
    }

    #[test]
    fn zero_evals_has_no_minimum() {
        let mut strategy = RandomSearch::new(Some(0));
        let mut trials = Trials::new();
        assert!(fmin(distance, &unit_space(), 0, &mut strategy, &mut trials).is_err());
    }

    #[test]
    fn invalid_space_is_rejected() {
        let mut strategy = RandomSearch::new(Some(0));
        let mut trials = Trials::new();
        let err = fmin(distance, &SearchSpace::new(), 5, &mut strategy, &mut trials).unwrap_err();
        assert!(matches!(err, HpoError::Space(_)));
    }
}
