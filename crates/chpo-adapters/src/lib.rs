//! # chpo-adapters
//!
//! Entry points that run a hyperparameter search against a caller-supplied
//! objective and return the test-split loss of the best configuration found.
//!
//! - [`sequential_search`]: TPE-guided sequential search
//! - [`StagedSequentialSearch`]: sequential search in buckets of growing budget
//! - [`bandit_search`]: Hyperband over an in-process coordinator and worker
//! - [`bayesian_bandit_search`]: the same, with BOHB suggestions

mod bandit;
mod config;
mod sequential;
mod staged;

pub use bandit::{
    bandit_search, bayesian_bandit_search, BanditKind, BanditReport, BanditSearch, LifecycleState,
};
pub use config::AdapterConfig;
pub use sequential::{sequential_search, SequentialSearch};
pub use staged::{bucket_schedule, BucketPlan, StagedSequentialSearch};

pub use chpo_dispatch::{DispatchEvent, Endpoint};
pub use chpo_search::{BohbConfig, StrategyKind, TpeConfig};
pub use chpo_types::{
    Configuration, DispatchError, HpoError, HpoResult, Objective, ParameterValue, SearchSpace,
    Split,
};
