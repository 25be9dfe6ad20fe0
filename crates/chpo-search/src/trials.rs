//! Trial history shared across search calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chpo_types::Configuration;

/// A single evaluation of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub trial_number: usize,
    pub configuration: Configuration,
    pub status: TrialStatus,
    pub loss: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(trial_number: usize, configuration: Configuration) -> Self {
        Self {
            id: Uuid::new_v4(),
            trial_number,
            configuration,
            status: TrialStatus::Pending,
            loss: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, loss: f64) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.loss = Some(loss);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Loss of a completed trial, if it is comparable.
    pub fn completed_loss(&self) -> Option<f64> {
        match (self.status, self.loss) {
            (TrialStatus::Completed, Some(loss)) if !loss.is_nan() => Some(loss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Ordered record of every trial a search has run.
///
/// Successive `fmin` calls on the same history continue where the previous
/// call stopped: the evaluation target counts every recorded trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trials {
    trials: Vec<Trial>,
}

impl Trials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn push(&mut self, trial: Trial) {
        self.trials.push(trial);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.trials.iter()
    }

    /// Completed trials paired with their loss.
    pub fn completed(&self) -> impl Iterator<Item = (&Trial, f64)> {
        self.trials
            .iter()
            .filter_map(|t| t.completed_loss().map(|loss| (t, loss)))
    }

    /// The completed trial with the lowest loss. Earlier trials win ties.
    pub fn best(&self) -> Option<&Trial> {
        self.completed()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(trial, _)| trial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chpo_types::ParameterValue;

    fn config(x: f64) -> Configuration {
        let mut c = Configuration::new();
        c.insert("x".into(), ParameterValue::Float(x));
        c
    }

    fn completed(number: usize, x: f64, loss: f64) -> Trial {
        let mut trial = Trial::new(number, config(x));
        trial.mark_running();
        trial.mark_completed(loss);
        trial
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = Trial::new(0, config(0.1));
        assert_eq!(trial.status, TrialStatus::Pending);

        trial.mark_running();
        assert_eq!(trial.status, TrialStatus::Running);
        assert!(trial.started_at.is_some());

        trial.mark_completed(0.4);
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert_eq!(trial.completed_loss(), Some(0.4));
    }

    #[test]
    fn trial_failure() {
        let mut trial = Trial::new(0, config(0.1));
        trial.mark_running();
        trial.mark_failed("objective diverged".into());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error.as_deref(), Some("objective diverged"));
        assert_eq!(trial.completed_loss(), None);
    }

    #[test]
    fn best_skips_failed_and_nan() {
        let mut trials = Trials::new();
        trials.push(completed(0, 0.1, 0.5));
        trials.push(completed(1, 0.2, f64::NAN));
        let mut failed = Trial::new(2, config(0.3));
        failed.mark_failed("boom".into());
        trials.push(failed);
        trials.push(completed(3, 0.4, 0.2));

        assert_eq!(trials.len(), 4);
        assert_eq!(trials.completed().count(), 2);
        assert_eq!(trials.best().unwrap().trial_number, 3);
    }

    #[test]
    fn best_prefers_earliest_tie() {
        let mut trials = Trials::new();
        trials.push(completed(0, 0.1, 0.3));
        trials.push(completed(1, 0.2, 0.3));
        assert_eq!(trials.best().unwrap().trial_number, 0);
    }
}
