//! Task recorder and persistence sink
//!
//! Every mutation of a running task goes through [`TaskRecorder::update`],
//! which applies the change under one lock and queues a snapshot of the
//! result. A single persister task writes snapshots to the [`AckSink`] in
//! mutation order, skipping snapshots that were superseded while a write
//! was in flight.

use async_trait::async_trait;
use conduit_core::domain::task::{JobTask, WorkflowTask};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::TaskStore;

/// Persistence callback invoked after task mutations
#[async_trait]
pub trait AckSink: Send + Sync {
    async fn ack(&self, task: &WorkflowTask) -> anyhow::Result<()>;
}

/// Writes snapshots to the task store
pub struct StoreAckSink {
    store: Arc<dyn TaskStore>,
}

impl StoreAckSink {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AckSink for StoreAckSink {
    async fn ack(&self, task: &WorkflowTask) -> anyhow::Result<()> {
        self.store.update_by_id(task).await
    }
}

enum Message {
    Snapshot(Box<WorkflowTask>),
    Flush(oneshot::Sender<()>),
}

/// Shared handle to the live document of one running task
#[derive(Clone)]
pub struct TaskRecorder {
    task: Arc<Mutex<WorkflowTask>>,
    tx: mpsc::UnboundedSender<Message>,
}

impl TaskRecorder {
    /// Starts the persister for `task`
    ///
    /// The persister stops once every recorder clone is dropped.
    pub fn start(task: WorkflowTask, sink: Arc<dyn AckSink>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(persist_loop(rx, sink));
        let recorder = Self {
            task: Arc::new(Mutex::new(task)),
            tx,
        };
        (recorder, handle)
    }

    pub fn snapshot(&self) -> WorkflowTask {
        self.task.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&WorkflowTask) -> R) -> R {
        f(&self.task.lock())
    }

    /// Applies a mutation and queues the resulting document for persistence
    pub fn update<R>(&self, f: impl FnOnce(&mut WorkflowTask) -> R) -> R {
        let mut task = self.task.lock();
        let result = f(&mut task);
        // Sent while locked so queue order matches mutation order
        if self
            .tx
            .send(Message::Snapshot(Box::new(task.clone())))
            .is_err()
        {
            warn!(
                "Persister for task {}#{} is gone, snapshot dropped",
                task.workflow_name, task.task_id
            );
        }
        result
    }

    /// Applies a mutation that is persisted with the next acknowledged update
    pub fn update_quietly<R>(&self, f: impl FnOnce(&mut WorkflowTask) -> R) -> R {
        f(&mut self.task.lock())
    }

    /// Mutates one job task; returns `None` when the key is unknown
    pub fn update_job<R>(&self, key: &str, f: impl FnOnce(&mut JobTask) -> R) -> Option<R> {
        self.update(|task| task.find_job_mut(key).map(f))
    }

    pub fn job(&self, key: &str) -> Option<JobTask> {
        self.read(|task| task.find_job(key).cloned())
    }

    /// Waits until every queued snapshot has been handed to the sink
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn persist_loop(mut rx: mpsc::UnboundedReceiver<Message>, sink: Arc<dyn AckSink>) {
    while let Some(message) = rx.recv().await {
        let mut latest = None;
        let mut flushes = Vec::new();
        collect(message, &mut latest, &mut flushes);

        // Coalesce anything that queued up behind this message
        while let Ok(message) = rx.try_recv() {
            collect(message, &mut latest, &mut flushes);
        }

        if let Some(task) = latest {
            debug!(
                "Persisting task {}#{} ({})",
                task.workflow_name, task.task_id, task.status
            );
            if let Err(e) = sink.ack(&task).await {
                warn!(
                    "Failed to persist task {}#{}: {:#}",
                    task.workflow_name, task.task_id, e
                );
            }
        }

        for done in flushes {
            let _ = done.send(());
        }
    }
}

fn collect(
    message: Message,
    latest: &mut Option<Box<WorkflowTask>>,
    flushes: &mut Vec<oneshot::Sender<()>>,
) {
    match message {
        Message::Snapshot(task) => *latest = Some(task),
        Message::Flush(done) => flushes.push(done),
    }
}
