//! Task store
//!
//! Durable home of workflow task documents, keyed by workflow name and
//! task id.

use async_trait::async_trait;
use conduit_core::domain::task::WorkflowTask;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &WorkflowTask) -> anyhow::Result<()>;

    async fn find(&self, workflow_name: &str, task_id: i64)
    -> anyhow::Result<Option<WorkflowTask>>;

    /// Replaces the stored document with the same id
    async fn update_by_id(&self, task: &WorkflowTask) -> anyhow::Result<()>;

    /// Non-archived tasks of a workflow, newest first
    async fn list(
        &self,
        workflow_name: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<WorkflowTask>>;

    /// Non-archived tasks of every workflow that have not reached a
    /// terminal status, oldest first
    async fn list_unfinished(&self) -> anyhow::Result<Vec<WorkflowTask>>;

    /// Atomically allocates the next task id of a workflow, starting at 1
    async fn get_next_seq(&self, workflow_name: &str) -> anyhow::Result<i64>;
}

/// Process-local store
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<BTreeMap<(String, i64), WorkflowTask>>,
    seqs: Mutex<HashMap<String, i64>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &WorkflowTask) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock();
        let key = (task.workflow_name.clone(), task.task_id);
        if tasks.contains_key(&key) {
            anyhow::bail!(
                "task {}#{} already exists",
                task.workflow_name,
                task.task_id
            );
        }
        tasks.insert(key, task.clone());
        Ok(())
    }

    async fn find(
        &self,
        workflow_name: &str,
        task_id: i64,
    ) -> anyhow::Result<Option<WorkflowTask>> {
        Ok(self
            .tasks
            .lock()
            .get(&(workflow_name.to_string(), task_id))
            .cloned())
    }

    async fn update_by_id(&self, task: &WorkflowTask) -> anyhow::Result<()> {
        let mut tasks = self.tasks.lock();
        let slot = tasks
            .values_mut()
            .find(|stored| stored.id == task.id)
            .ok_or_else(|| anyhow::anyhow!("task {} not found", task.id))?;
        *slot = task.clone();
        Ok(())
    }

    async fn list(
        &self,
        workflow_name: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<WorkflowTask>> {
        let tasks = self.tasks.lock();
        Ok(tasks
            .values()
            .rev()
            .filter(|task| task.workflow_name == workflow_name && !task.is_archived)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_unfinished(&self) -> anyhow::Result<Vec<WorkflowTask>> {
        let tasks = self.tasks.lock();
        let mut unfinished: Vec<WorkflowTask> = tasks
            .values()
            .filter(|task| !task.is_archived && !task.is_finished())
            .cloned()
            .collect();
        unfinished.sort_by_key(|task| task.create_time);
        Ok(unfinished)
    }

    async fn get_next_seq(&self, workflow_name: &str) -> anyhow::Result<i64> {
        let mut seqs = self.seqs.lock();
        let seq = seqs.entry(workflow_name.to_string()).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }
}
