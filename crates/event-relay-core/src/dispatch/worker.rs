//! # Dispatch Worker Pool
//!
//! Bounded queue of dispatch jobs served by a fixed number of worker tasks.
//!
//! Submitting never waits. A job that cannot be queued is handed back to the
//! caller as a [`QueueRejected`], which records it on the event so that a
//! manual retry can pick it up.

use super::Dispatcher;
use crate::events::NormalizedEvent;
use crate::RecordId;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Worker pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

/// A persisted event awaiting dispatch
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub record_id: RecordId,
    pub event: NormalizedEvent,
}

/// Why a job could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRejected {
    Full,
    Closed,
}

impl QueueRejected {
    /// Reason code written to `last_error`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Full => "DISPATCH_QUEUE_FULL",
            Self::Closed => "DISPATCH_QUEUE_CLOSED",
        }
    }
}

impl std::fmt::Display for QueueRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Producer handle for the dispatch queue.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    sender: mpsc::Sender<DispatchJob>,
}

impl DispatchQueue {
    /// Start `config.workers` workers serving a queue of
    /// `config.queue_capacity` jobs.
    ///
    /// Workers exit once every queue handle has been dropped and the queue
    /// is drained.
    pub fn start(dispatcher: Arc<Dispatcher>, config: DispatchConfig) -> (Self, DispatchWorkers) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let dispatcher = dispatcher.clone();
                tokio::spawn(run_worker(worker, receiver, dispatcher))
            })
            .collect();

        info!(
            workers = config.workers.max(1),
            queue_capacity = config.queue_capacity.max(1),
            "Dispatch workers started"
        );

        (Self { sender }, DispatchWorkers { handles })
    }

    /// Enqueue a job without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRejected`] when the queue is full or closed. The job is
    /// dropped.
    pub fn submit(&self, job: DispatchJob) -> Result<(), QueueRejected> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(record_id = %job.record_id, "Dispatch queue full");
                Err(QueueRejected::Full)
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(record_id = %job.record_id, "Dispatch queue closed");
                Err(QueueRejected::Closed)
            }
        }
    }

    /// Number of jobs waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

/// Join handles of the running workers.
#[derive(Debug)]
pub struct DispatchWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl DispatchWorkers {
    /// Wait for every worker to finish.
    ///
    /// Only returns after all [`DispatchQueue`] handles are dropped.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch worker terminated abnormally");
            }
        }
        info!("Dispatch workers stopped");
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
    dispatcher: Arc<Dispatcher>,
) {
    loop {
        // Lock is released before the job runs
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else {
            debug!(worker, "Dispatch queue closed, worker exiting");
            return;
        };

        dispatcher.dispatch(&job.event, &job.record_id).await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
