//! # chpo-dispatch
//!
//! Coordinator and worker for running evaluation jobs in-process over
//! loopback TCP. Messages are newline-delimited JSON.

mod coordinator;
mod endpoint;
mod protocol;
mod worker;

pub use coordinator::{Coordinator, DispatchEvent};
pub use endpoint::{Endpoint, COORDINATOR_ADDR_ENV};
pub use protocol::{
    decode_line, encode_line, CoordinatorMessage, JobDescriptor, JobOutcome, WorkerMessage,
};
pub use worker::{Worker, WorkerHandle};
