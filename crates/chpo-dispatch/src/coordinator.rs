//! The coordinator side: accepts workers, hands out jobs and routes results
//! back to whoever submitted them.

use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chpo_types::{DispatchError, HpoResult};

use crate::endpoint::Endpoint;
use crate::protocol::{decode_line, encode_line, CoordinatorMessage, JobDescriptor, WorkerMessage};

/// How long `shutdown` waits for worker connections to close on their own.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Events emitted by the coordinator for external consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchEvent {
    Listening { addr: String },
    WorkerRegistered { worker_id: String },
    WorkerRejected { reason: String },
    WorkerDisconnected { worker_id: String },
    JobDispatched { job_id: Uuid, worker_id: String, budget: f64 },
    JobFinished { job_id: Uuid, loss: Option<f64>, error: Option<String> },
    Shutdown,
}

struct PendingJob {
    worker_id: String,
    reply: oneshot::Sender<Result<f64, String>>,
}

/// State shared between the coordinator handle and its connection tasks.
struct Shared {
    run_id: String,
    writers: Mutex<HashMap<String, mpsc::UnboundedSender<CoordinatorMessage>>>,
    pending: DashMap<Uuid, PendingJob>,
    idle_tx: mpsc::UnboundedSender<String>,
    workers: watch::Sender<usize>,
    connections: Mutex<Vec<JoinHandle<()>>>,
    events: Option<Sender<DispatchEvent>>,
}

impl Shared {
    fn emit(&self, event: DispatchEvent) {
        if let Some(events) = &self.events {
            let _ = events.try_send(event);
        }
    }
}

/// Listens for workers of one run and dispatches jobs to them one at a time
/// per worker.
///
/// Dropping the coordinator aborts its tasks and releases the listening
/// socket.
pub struct Coordinator {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    idle_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    accept_task: Option<JoinHandle<()>>,
}

impl Coordinator {
    /// Bind `endpoint` and start accepting workers registering for `run_id`.
    pub async fn start(
        endpoint: &Endpoint,
        run_id: impl Into<String>,
        events: Option<Sender<DispatchEvent>>,
    ) -> HpoResult<Self> {
        let addr = endpoint.address();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| DispatchError::BindFailed {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let (workers, _) = watch::channel(0usize);
        let shared = Arc::new(Shared {
            run_id: run_id.into(),
            writers: Mutex::new(HashMap::new()),
            pending: DashMap::new(),
            idle_tx,
            workers,
            connections: Mutex::new(Vec::new()),
            events,
        });

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));

        info!(run_id = %shared.run_id, addr = %local_addr, "coordinator listening");
        shared.emit(DispatchEvent::Listening {
            addr: local_addr.to_string(),
        });

        Ok(Self {
            local_addr,
            shared,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
            accept_task: Some(accept_task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Workers currently registered.
    pub fn worker_count(&self) -> usize {
        *self.shared.workers.borrow()
    }

    /// Wait until at least `n` workers have registered.
    pub async fn wait_for_workers(&self, n: usize, timeout: Duration) -> HpoResult<()> {
        let mut workers = self.shared.workers.subscribe();
        let attached = matches!(
            tokio::time::timeout(timeout, workers.wait_for(|count| *count >= n)).await,
            Ok(Ok(_))
        );
        if !attached {
            return Err(DispatchError::NoWorker {
                run_id: self.shared.run_id.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Run `job` on the next idle worker and wait for its loss.
    pub async fn submit(&self, job: JobDescriptor) -> HpoResult<f64> {
        let job_id = job.job_id;
        let budget = job.budget;
        let mut message = Some(CoordinatorMessage::Job(job));

        loop {
            let worker_id = self.next_idle_worker().await.ok_or_else(|| DispatchError::NoWorker {
                run_id: self.shared.run_id.clone(),
            })?;

            let Some(writer) = self.shared.writers.lock().get(&worker_id).cloned() else {
                // Worker left while idle.
                continue;
            };

            let (reply, outcome) = oneshot::channel();
            self.shared.pending.insert(
                job_id,
                PendingJob {
                    worker_id: worker_id.clone(),
                    reply,
                },
            );

            let Some(msg) = message.take() else {
                return Err(chpo_types::internal_error!("job {job_id} was consumed twice"));
            };
            if let Err(mpsc::error::SendError(msg)) = writer.send(msg) {
                self.shared.pending.remove(&job_id);
                message = Some(msg);
                continue;
            }

            debug!(job_id = %job_id, worker_id = %worker_id, budget, "job dispatched");
            self.shared.emit(DispatchEvent::JobDispatched {
                job_id,
                worker_id: worker_id.clone(),
                budget,
            });

            let result = outcome.await.map_err(|_| DispatchError::WorkerDisconnected {
                worker_id: worker_id.clone(),
            })?;
            let _ = self.shared.idle_tx.send(worker_id);

            self.shared.emit(DispatchEvent::JobFinished {
                job_id,
                loss: result.as_ref().ok().copied(),
                error: result.as_ref().err().cloned(),
            });

            return result.map_err(|message| {
                DispatchError::RemoteEvaluation {
                    job_id: job_id.to_string(),
                    message,
                }
                .into()
            });
        }
    }

    async fn next_idle_worker(&self) -> Option<String> {
        let mut idle = self.idle_rx.lock().await;
        let mut workers = self.shared.workers.subscribe();
        tokio::select! {
            worker_id = idle.recv() => worker_id,
            _ = workers.wait_for(|count| *count == 0) => None,
        }
    }

    /// Tell every worker to exit, then stop listening.
    pub async fn shutdown(mut self) {
        let writers: Vec<_> = self.shared.writers.lock().drain().collect();
        for (worker_id, writer) in writers {
            if writer.send(CoordinatorMessage::Shutdown).is_err() {
                debug!(worker_id = %worker_id, "worker already gone");
            }
        }

        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
            let _ = accept_task.await;
        }

        let connections: Vec<_> = self.shared.connections.lock().drain(..).collect();
        for connection in connections {
            let abort = connection.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, connection).await.is_err() {
                warn!("worker connection did not close in time");
                abort.abort();
            }
        }

        info!(run_id = %self.shared.run_id, addr = %self.local_addr, "coordinator shut down");
        self.shared.emit(DispatchEvent::Shutdown);
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(accept_task) = self.accept_task.take() {
            accept_task.abort();
        }
        for connection in self.shared.connections.lock().drain(..) {
            connection.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(peer = %peer, "worker connected");
                let connection = tokio::spawn(serve_worker(stream, Arc::clone(&shared)));
                shared.connections.lock().push(connection);
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
}

async fn serve_worker(stream: TcpStream, shared: Arc<Shared>) {
    let (read, write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let worker_id = match lines.next_line().await {
        Ok(Some(line)) => match decode_line::<WorkerMessage>(&line) {
            Ok(WorkerMessage::Register { worker_id, run_id }) if run_id == shared.run_id => {
                worker_id
            }
            Ok(WorkerMessage::Register { run_id, .. }) => {
                reject(&shared, format!("worker registered for run {run_id}"));
                return;
            }
            Ok(other) => {
                reject(&shared, format!("expected registration, got {other:?}"));
                return;
            }
            Err(e) => {
                reject(&shared, e.to_string());
                return;
            }
        },
        _ => return,
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write, rx, worker_id.clone()));
    shared.connections.lock().push(writer);
    shared.writers.lock().insert(worker_id.clone(), tx);
    let _ = shared.idle_tx.send(worker_id.clone());
    shared.workers.send_modify(|count| *count += 1);

    info!(worker_id = %worker_id, run_id = %shared.run_id, "worker registered");
    shared.emit(DispatchEvent::WorkerRegistered {
        worker_id: worker_id.clone(),
    });

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match decode_line::<WorkerMessage>(&line) {
                Ok(WorkerMessage::Result { job_id, outcome }) => {
                    match shared.pending.remove(&job_id) {
                        Some((_, pending)) => {
                            let _ = pending.reply.send(outcome.into_result());
                        }
                        None => warn!(job_id = %job_id, worker_id = %worker_id, "result for unknown job"),
                    }
                }
                Ok(WorkerMessage::Register { .. }) => {
                    warn!(worker_id = %worker_id, "duplicate registration ignored");
                }
                Err(e) => warn!(worker_id = %worker_id, error = %e, "dropping malformed message"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "worker connection failed");
                break;
            }
        }
    }

    shared.writers.lock().remove(&worker_id);
    // Dropping the reply senders fails any job still waiting on this worker.
    shared.pending.retain(|_, pending| pending.worker_id != worker_id);
    shared.workers.send_modify(|count| *count = count.saturating_sub(1));

    info!(worker_id = %worker_id, "worker disconnected");
    shared.emit(DispatchEvent::WorkerDisconnected { worker_id });
}

fn reject(shared: &Shared, reason: String) {
    warn!(run_id = %shared.run_id, reason = %reason, "worker rejected");
    shared.emit(DispatchEvent::WorkerRejected { reason });
}

async fn write_loop(
    mut write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<CoordinatorMessage>,
    worker_id: String,
) {
    while let Some(message) = rx.recv().await {
        let shutdown = message == CoordinatorMessage::Shutdown;
        let line = match encode_line(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "failed to encode message");
                continue;
            }
        };
        if let Err(e) = write.write_all(line.as_bytes()).await {
            warn!(worker_id = %worker_id, error = %e, "failed to write to worker");
            break;
        }
        if shutdown {
            break;
        }
    }
    let _ = write.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chpo_types::{Configuration, HpoError};

    fn job(budget: f64) -> JobDescriptor {
        JobDescriptor {
            job_id: Uuid::new_v4(),
            config_id: "test".into(),
            configuration: Configuration::new(),
            budget,
        }
    }

    async fn send(stream: &mut TcpStream, message: &WorkerMessage) {
        stream
            .write_all(encode_line(message).unwrap().as_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn binds_an_os_assigned_port() {
        let coordinator = Coordinator::start(&Endpoint::default(), "run", None)
            .await
            .unwrap();
        assert_ne!(coordinator.local_addr().port(), 0);
        assert_eq!(coordinator.worker_count(), 0);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn bind_failure_names_the_address() {
        let held = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = held.local_addr().unwrap().port();

        let err = Coordinator::start(&Endpoint::default().with_port(port), "run", None)
            .await
            .err()
            .unwrap();
        match err {
            HpoError::Dispatch(DispatchError::BindFailed { addr, .. }) => {
                assert_eq!(addr, format!("127.0.0.1:{port}"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn routes_results_back_to_the_submitter() {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let coordinator = Coordinator::start(&Endpoint::default(), "run", Some(events_tx))
            .await
            .unwrap();
        let addr = coordinator.local_addr();

        // A hand-driven worker that answers with twice the budget.
        let worker = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            send(
                &mut stream,
                &WorkerMessage::Register {
                    worker_id: "w0".into(),
                    run_id: "run".into(),
                },
            )
            .await;
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Some(line) = lines.next_line().await.unwrap() {
                match decode_line::<CoordinatorMessage>(&line).unwrap() {
                    CoordinatorMessage::Job(job) => {
                        let reply = WorkerMessage::Result {
                            job_id: job.job_id,
                            outcome: crate::protocol::JobOutcome::Ok {
                                loss: Some(job.budget * 2.0),
                            },
                        };
                        write
                            .write_all(encode_line(&reply).unwrap().as_bytes())
                            .await
                            .unwrap();
                    }
                    CoordinatorMessage::Shutdown => break,
                }
            }
        });

        coordinator
            .wait_for_workers(1, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(coordinator.submit(job(3.0)).await.unwrap(), 6.0);
        assert_eq!(coordinator.submit(job(4.5)).await.unwrap(), 9.0);

        coordinator.shutdown().await;
        worker.await.unwrap();

        let events: Vec<DispatchEvent> = events_rx.try_iter().collect();
        assert!(events.contains(&DispatchEvent::WorkerRegistered {
            worker_id: "w0".into()
        }));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, DispatchEvent::JobFinished { .. }))
                .count(),
            2
        );
        assert_eq!(events.last(), Some(&DispatchEvent::Shutdown));
    }

    #[tokio::test]
    async fn rejects_workers_from_other_runs() {
        let coordinator = Coordinator::start(&Endpoint::default(), "mine", None)
            .await
            .unwrap();
        let mut stream = TcpStream::connect(coordinator.local_addr()).await.unwrap();
        send(
            &mut stream,
            &WorkerMessage::Register {
                worker_id: "intruder".into(),
                run_id: "theirs".into(),
            },
        )
        .await;

        let err = coordinator
            .wait_for_workers(1, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, HpoError::Dispatch(DispatchError::NoWorker { .. })));
    }

    #[tokio::test]
    async fn submit_without_workers_fails() {
        let coordinator = Coordinator::start(&Endpoint::default(), "run", None)
            .await
            .unwrap();
        let err = coordinator.submit(job(1.0)).await.unwrap_err();
        assert!(matches!(err, HpoError::Dispatch(DispatchError::NoWorker { .. })));
    }

    #[tokio::test]
    async fn disconnect_fails_the_pending_job() {
        let coordinator = Coordinator::start(&Endpoint::default(), "run", None)
            .await
            .unwrap();
        let addr = coordinator.local_addr();

        let worker = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            send(
                &mut stream,
                &WorkerMessage::Register {
                    worker_id: "flaky".into(),
                    run_id: "run".into(),
                },
            )
            .await;
            let mut lines = BufReader::new(stream).lines();
            // Read the job, then hang up without answering.
            lines.next_line().await.unwrap();
        });

        coordinator
            .wait_for_workers(1, Duration::from_secs(5))
            .await
            .unwrap();
        let err = coordinator.submit(job(1.0)).await.unwrap_err();
        assert!(matches!(
            err,
            HpoError::Dispatch(DispatchError::WorkerDisconnected { .. })
        ));
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn port_is_free_after_shutdown() {
        let coordinator = Coordinator::start(&Endpoint::default(), "run", None)
            .await
            .unwrap();
        let port = coordinator.local_addr().port();
        coordinator.shutdown().await;

        let again = Coordinator::start(&Endpoint::default().with_port(port), "run", None)
            .await
            .unwrap();
        assert_eq!(again.local_addr().port(), port);
    }

    #[tokio::test]
    async fn port_is_free_after_drop() {
        let coordinator = Coordinator::start(&Endpoint::default(), "run", None)
            .await
            .unwrap();
        let port = coordinator.local_addr().port();
        drop(coordinator);

        // The aborted accept task releases the listener once the runtime
        // gets to it.
        let endpoint = Endpoint::default().with_port(port);
        let mut again = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Ok(coordinator) = Coordinator::start(&endpoint, "run", None).await {
                again = Some(coordinator);
                break;
            }
        }
        assert_eq!(again.map(|c| c.local_addr().port()), Some(port));
    }
}
