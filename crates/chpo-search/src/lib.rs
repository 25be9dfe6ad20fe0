//! # chpo-search
//!
//! Search algorithms for chpo: trial history, random and TPE suggestion,
//! the `fmin` driver, Hyperband bracket planning and the bandit scheduler
//! with random or BOHB configuration generators.

mod bandit;
mod fmin;
mod generator;
mod hyperband;
mod kde;
mod parzen;
mod strategy;
mod trials;

pub use bandit::{BanditResult, BanditScheduler, ConfigId, Job, Run, Step};
pub use fmin::fmin;
pub use generator::{BohbConfig, BohbGenerator, ConfigGenerator, RandomSampling};
pub use hyperband::{Bracket, HyperbandPlan};
pub use kde::ProductKde;
pub use strategy::{make_rng, RandomSearch, SearchStrategy, StrategyKind, TpeConfig, TpeSearch};
pub use trials::{Trial, TrialStatus, Trials};
