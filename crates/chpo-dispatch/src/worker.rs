//! The worker side: connects to a coordinator, evaluates jobs on the
//! blocking pool and reports losses until told to stop.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use chpo_types::{internal_error, Evaluator, HpoResult};

use crate::protocol::{decode_line, encode_line, CoordinatorMessage, JobOutcome, WorkerMessage};

pub struct Worker {
    worker_id: String,
    run_id: String,
    evaluator: Arc<dyn Evaluator>,
}

impl Worker {
    pub fn new(run_id: impl Into<String>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            run_id: run_id.into(),
            evaluator,
        }
    }

    pub fn with_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Serve jobs from the coordinator at `addr`. Returns the number of jobs
    /// evaluated once the coordinator sends `Shutdown` or hangs up.
    pub async fn run(self, addr: SocketAddr) -> HpoResult<usize> {
        let stream = TcpStream::connect(addr).await?;
        let (read, mut write) = stream.into_split();

        let register = WorkerMessage::Register {
            worker_id: self.worker_id.clone(),
            run_id: self.run_id.clone(),
        };
        write.write_all(encode_line(&register)?.as_bytes()).await?;
        info!(worker_id = %self.worker_id, coordinator = %addr, "worker connected");

        let mut lines = BufReader::new(read).lines();
        let mut completed = 0;
        while let Some(line) = lines.next_line().await? {
            let job = match decode_line::<CoordinatorMessage>(&line)? {
                CoordinatorMessage::Job(job) => job,
                CoordinatorMessage::Shutdown => break,
            };

            debug!(
                worker_id = %self.worker_id,
                job_id = %job.job_id,
                config_id = %job.config_id,
                budget = job.budget,
                "evaluating job"
            );

            let evaluator = Arc::clone(&self.evaluator);
            let configuration = job.configuration;
            let budget = job.budget;
            let result = tokio::task::spawn_blocking(move || evaluator.evaluate(&configuration, budget))
                .await
                .unwrap_or_else(|e| Err(internal_error!("evaluation task failed: {e}")));

            let reply = WorkerMessage::Result {
                job_id: job.job_id,
                outcome: JobOutcome::from_result(result),
            };
            write.write_all(encode_line(&reply)?.as_bytes()).await?;
            completed += 1;
        }

        info!(worker_id = %self.worker_id, completed, "worker stopped");
        Ok(completed)
    }

    /// Run the worker on its own task.
    pub fn spawn(self, addr: SocketAddr) -> WorkerHandle {
        let worker_id = self.worker_id.clone();
        WorkerHandle {
            worker_id,
            task: tokio::spawn(self.run(addr)),
        }
    }
}

pub struct WorkerHandle {
    worker_id: String,
    task: JoinHandle<HpoResult<usize>>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to exit.
    pub async fn join(self) -> HpoResult<usize> {
        self.task
            .await
            .map_err(|e| internal_error!("worker {} panicked: {e}", self.worker_id))?
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
