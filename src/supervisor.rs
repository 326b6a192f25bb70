//! C10 — runs the worker tasks, restarts any that terminate, and owns shutdown.
//!
//! Workers observe a shared [`tokio::sync::watch`] stop flag. A worker that
//! returns (crash or otherwise) is restarted on the supervisor's next restart
//! check; on shutdown the supervisor flips the flag and joins every worker
//! within a bounded grace period before giving up.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::controller::Controller;

/// A worker's entry point, re-invoked with a fresh stop receiver each restart.
pub type WorkerFn = Arc<dyn Fn(watch::Receiver<bool>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Named worker factories handed to [`Supervisor::run`].
pub struct Worker {
    /// Name used in restart/shutdown logging.
    pub name: &'static str,
    /// Entry point, called once per (re)start.
    pub task: WorkerFn,
}

/// The C10 supervisor.
pub struct Supervisor {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    controller: Arc<dyn Controller>,
    restart_period: Duration,
    join_timeout: Duration,
}

impl Supervisor {
    /// Build a supervisor. `controller` is stopped once, after every worker has
    /// joined. `restart_period` is the liveness-check cadence (spec default
    /// 2s); `join_timeout` bounds how long shutdown waits for workers to
    /// return after the stop flag is raised (spec default 30s).
    pub fn new(controller: Arc<dyn Controller>, restart_period: Duration, join_timeout: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            stop_rx,
            controller,
            restart_period,
            join_timeout,
        }
    }

    /// A clone of the stop sender, for callers (e.g. a signal handler) that
    /// need to trigger shutdown independently of `run`.
    pub fn stop_sender(&self) -> watch::Sender<bool> {
        self.stop_tx.clone()
    }

    /// Spawn every worker and supervise them until the stop flag is raised.
    /// `on_heartbeat` is invoked at least once every `heartbeat_period` while
    /// the supervisor is alive, signaling liveness to the process manager.
    #[instrument(skip(self, workers, on_heartbeat))]
    pub async fn run(
        &self,
        workers: Vec<Worker>,
        heartbeat_period: Duration,
        mut on_heartbeat: impl FnMut() + Send + 'static,
    ) {
        let mut handles: HashMap<&'static str, JoinHandle<()>> = HashMap::new();
        for worker in &workers {
            handles.insert(worker.name, self.spawn(worker));
        }

        let mut restart_ticker = tokio::time::interval(self.restart_period);
        let mut heartbeat_ticker = tokio::time::interval(heartbeat_period);
        let mut stop = self.stop_rx.clone();

        loop {
            tokio::select! {
                _ = restart_ticker.tick() => {
                    for worker in &workers {
                        let finished = handles.get(worker.name).map(|h| h.is_finished()).unwrap_or(true);
                        if finished {
                            warn!(worker = worker.name, "worker terminated, restarting");
                            handles.insert(worker.name, self.spawn(worker));
                        }
                    }
                }
                _ = heartbeat_ticker.tick() => {
                    on_heartbeat();
                }
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("shutdown signaled, joining workers");
        let deadline = tokio::time::Instant::now() + self.join_timeout;
        for (name, handle) in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => info!(worker = name, "worker joined"),
                Ok(Err(err)) => warn!(worker = name, error = %err, "worker panicked during shutdown"),
                Err(_) => warn!(worker = name, "worker did not join within the shutdown grace period"),
            }
        }

        match self.controller.stop().await {
            Ok(()) => info!("controller stopped"),
            Err(err) => warn!(error = %err, "controller failed to stop cleanly"),
        }
    }

    /// Raise the stop flag, signaling every worker to wind down on its next wait.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    fn spawn(&self, worker: &Worker) -> JoinHandle<()> {
        let task = worker.task.clone();
        let stop = self.stop_rx.clone();
        tokio::spawn(task(stop))
    }
}
