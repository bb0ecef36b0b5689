//! In-memory store
//!
//! A single-process backend with the same semantics as the Postgres store.
//! One mutex guards every document, so each operation is a single critical
//! section and `claim_task` is a true compare-and-set.

use async_trait::async_trait;
use poller_core::domain::step::returns_from;
use poller_core::{HandledCount, Params, Server, Step, Task, TaskError, TaskState, now_millis};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::repository::{
    ServerRepository, ServerStateUpdate, StepRepository, Store, TaskRepository,
};

#[derive(Default)]
struct Documents {
    tasks: Vec<Task>,
    steps: HashMap<String, Step>,
    servers: HashMap<String, Server>,
}

/// Store backed by process memory
pub struct MemoryStore {
    docs: Mutex<Documents>,
    reachable: AtomicBool,
    connected: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(Documents::default()),
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent operation fail with a connection error
    /// (or succeed again), to exercise outage handling
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Returns true between `connect` and `close`
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Inserts a task document, replacing one with the same id
    pub async fn insert_task(&self, task: Task) {
        let mut docs = self.docs.lock().await;
        docs.tasks.retain(|t| t.id != task.id);
        docs.tasks.push(task);
    }

    /// Inserts a step document, replacing one with the same id
    pub async fn insert_step(&self, step: Step) {
        let mut docs = self.docs.lock().await;
        docs.steps.insert(step.id.clone(), step);
    }

    pub async fn task(&self, id: &str) -> Option<Task> {
        let docs = self.docs.lock().await;
        docs.tasks.iter().find(|t| t.id == id).cloned()
    }

    /// All tasks in insertion order
    pub async fn tasks(&self) -> Vec<Task> {
        self.docs.lock().await.tasks.clone()
    }

    pub async fn step(&self, id: &str) -> Option<Step> {
        self.docs.lock().await.steps.get(id).cloned()
    }

    pub async fn server(&self, id: &str) -> Option<Server> {
        self.docs.lock().await.servers.get(id).cloned()
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("memory store unreachable".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn claim_task(&self, names: &[String], task_list: &str) -> Result<Option<Task>> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;

        let candidate = docs
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| {
                t.state == TaskState::Pending
                    && t.task_list_name == task_list
                    && names.iter().any(|n| *n == t.name)
            })
            .filter(|(_, t)| {
                !docs
                    .tasks
                    .iter()
                    .any(|r| r.step_id == t.step_id && r.state == TaskState::Running)
            })
            .min_by_key(|(_, t)| t.created)
            .map(|(idx, _)| idx);

        let Some(idx) = candidate else {
            return Ok(None);
        };

        let task = &mut docs.tasks[idx];
        task.state = TaskState::Running;
        task.updated = now_millis();
        Ok(Some(task.clone()))
    }

    async fn mark_task_completed(&self, task: &Task) -> Result<()> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;

        if let Some(stored) = docs
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id && t.state == TaskState::Running)
        {
            stored.state = TaskState::Completed;
            stored.updated = now_millis();
        }
        Ok(())
    }

    async fn mark_task_failed(&self, task: &Task, message: &str) -> Result<()> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;

        if let Some(stored) = docs
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id && t.state == TaskState::Running)
        {
            stored.state = TaskState::Failed;
            stored.updated = now_millis();
            stored.error = Some(TaskError {
                message: message.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_resume_task(
        &self,
        step_id: &str,
        workflow_id: &str,
        task_list: &str,
    ) -> Result<Task> {
        self.ensure_reachable()?;
        let task = Task::resume(step_id, workflow_id, task_list);
        self.docs.lock().await.tasks.push(task.clone());
        Ok(task)
    }
}

#[async_trait]
impl StepRepository for MemoryStore {
    async fn read_step_params(&self, step_id: &str) -> Result<Params> {
        self.ensure_reachable()?;
        let docs = self.docs.lock().await;

        docs.steps
            .get(step_id)
            .map(Step::param_values)
            .ok_or_else(|| StoreError::not_found("step", step_id))
    }

    async fn write_step_returns(&self, step_id: &str, returns: &Params) -> Result<u64> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;

        match docs.steps.get_mut(step_id) {
            Some(step) if step.is_awaiting_result() => {
                step.attributes.returns.extend(returns_from(returns));
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[async_trait]
impl ServerRepository for MemoryStore {
    async fn upsert_server(&self, server: &Server) -> Result<()> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;
        docs.servers.insert(server.id.clone(), server.clone());
        Ok(())
    }

    async fn touch_server(&self, server_id: &str, ping_time: i64) -> Result<()> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;
        if let Some(server) = docs.servers.get_mut(server_id) {
            server.ping_time = ping_time;
        }
        Ok(())
    }

    async fn set_server_state(&self, server_id: &str, update: ServerStateUpdate) -> Result<()> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;
        if let Some(server) = docs.servers.get_mut(server_id) {
            server.state = update.state;
            server.ping_time = update.ping_time;
        }
        Ok(())
    }

    async fn update_handled(&self, server_id: &str, handled: &[HandledCount]) -> Result<()> {
        self.ensure_reachable()?;
        let mut docs = self.docs.lock().await;
        if let Some(server) = docs.servers.get_mut(server_id) {
            server.handled = Some(handled.to_vec());
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn connect(&self) -> Result<()> {
        self.ensure_reachable()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
