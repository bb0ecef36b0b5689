//! Agent poller
//!
//! Claims tasks for the registered handlers and processes them. Each
//! claimed task runs in its own tokio task holding one semaphore permit; a
//! heartbeat task keeps the server record fresh. Both loops watch the same
//! shutdown signal.

use poller_core::{HandledCount, Task};
use poller_store::Store;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::pipeline::{TaskOutcome, TaskPipeline};
use super::stats::HandledStats;
use crate::config::{AgentPollerConfig, max_concurrent_limit};
use crate::error::Result;
use crate::handler::{Handler, HandlerRegistry};
use crate::registration::ServerRegistration;

/// Lifecycle state of a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerState::Stopped => write!(f, "stopped"),
            PollerState::Starting => write!(f, "starting"),
            PollerState::Running => write!(f, "running"),
            PollerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Claims and processes tasks for a set of handlers
pub struct AgentPoller {
    config: AgentPollerConfig,
    server_id: String,
    store: Arc<dyn Store>,
    registry: HandlerRegistry,
    stats: HandledStats,
    pipeline: TaskPipeline,
    registration: ServerRegistration,
    semaphore: Arc<Semaphore>,
    capacity: usize,
    state: watch::Sender<PollerState>,
    shutdown: watch::Sender<bool>,
}

impl AgentPoller {
    /// Creates a new poller
    ///
    /// The server id comes from the configuration, or is generated.
    pub fn new(config: AgentPollerConfig, store: Arc<dyn Store>) -> Self {
        let server_id = config
            .server_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let registry = HandlerRegistry::new();
        let stats = HandledStats::new();
        let pipeline = TaskPipeline::new(Arc::clone(&store), registry.clone(), stats.clone());
        let registration = ServerRegistration::new(Arc::clone(&store), server_id.clone());
        // Out-of-range budgets are rejected by `start`; clamp so construction
        // never panics.
        let capacity = config.max_concurrent.min(max_concurrent_limit());
        let semaphore = Arc::new(Semaphore::new(capacity));

        Self {
            config,
            server_id,
            store,
            registry,
            stats,
            pipeline,
            registration,
            semaphore,
            capacity,
            state: watch::Sender::new(PollerState::Stopped),
            shutdown: watch::Sender::new(false),
        }
    }

    /// Registers a handler under `name` (short, e.g. "Foo", or qualified,
    /// e.g. "ns.Foo")
    ///
    /// Handlers should be registered before `start`; the server record
    /// lists the handlers known at that time.
    pub fn register(&self, name: impl Into<String>, handler: impl Handler + 'static) {
        self.registry.register(name, handler);
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn config(&self) -> &AgentPollerConfig {
        &self.config
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Per-handler success and failure counts
    pub fn handled(&self) -> Vec<HandledCount> {
        self.stats.snapshot()
    }

    /// Number of tasks currently being processed
    pub fn active_tasks(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Runs the poller until `stop` is called
    ///
    /// Connects to the store, registers the server record, starts the
    /// heartbeat and polls on the configured interval. Returns immediately
    /// if the poller is not stopped. Only configuration and connection
    /// errors are returned; everything after that is logged.
    pub async fn start(&self) -> Result<()> {
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if *state != PollerState::Stopped {
                return false;
            }
            // Reset under the state lock so a concurrent stop() that
            // observes Starting cannot have its signal overwritten.
            self.shutdown.send_replace(false);
            *state = PollerState::Starting;
            claimed = true;
            true
        });

        if !claimed {
            debug!("Poller {} already started", self.server_id);
            return Ok(());
        }

        info!(
            "Starting agent poller {} (task list: {}, interval: {:?}, max concurrent: {})",
            self.server_id,
            self.config.task_list,
            self.config.poll_interval,
            self.config.max_concurrent
        );

        if let Err(e) = self.config.validate() {
            self.state.send_replace(PollerState::Stopped);
            return Err(e);
        }

        if let Err(e) = self.store.connect().await {
            error!("Failed to connect to store: {:#}", e);
            self.state.send_replace(PollerState::Stopped);
            return Err(e.into());
        }

        if let Err(e) = self
            .registration
            .register(&self.config, self.registry.names())
            .await
        {
            warn!("Failed to register server {}: {:#}", self.server_id, e);
        }

        let heartbeat = self.spawn_heartbeat_loop();
        self.state.send_replace(PollerState::Running);

        self.run_poll_loop().await;

        self.state.send_replace(PollerState::Stopping);
        info!("Stopping agent poller {}", self.server_id);

        self.drain().await;

        if let Err(e) = heartbeat.await {
            warn!("Heartbeat task panicked: {}", e);
        }

        if let Err(e) = self.registration.deregister().await {
            warn!("Failed to deregister server {}: {:#}", self.server_id, e);
        }

        self.store.close().await;
        self.state.send_replace(PollerState::Stopped);
        info!("Agent poller {} stopped", self.server_id);

        Ok(())
    }

    /// Stops claiming tasks and waits until the poller is stopped
    ///
    /// In-flight tasks are not cancelled; this returns after they finish,
    /// the server record is marked shut down and the store is closed.
    pub async fn stop(&self) {
        let mut state = self.state.subscribe();
        if *state.borrow_and_update() == PollerState::Stopped {
            return;
        }

        debug!("Signalling poller {} to stop", self.server_id);
        self.shutdown.send_replace(true);

        let _ = state.wait_for(|s| *s == PollerState::Stopped).await;
    }

    /// Claims and processes at most one task inline
    ///
    /// Starts no background loop and ignores the concurrency budget. Returns
    /// the outcome of the processed task, or `None` when nothing was claimed.
    pub async fn poll_once(&self) -> poller_store::Result<Option<TaskOutcome>> {
        let names = self.registry.names();
        if names.is_empty() {
            return Ok(None);
        }

        match self.store.claim_task(&names, &self.config.task_list).await? {
            Some(task) => Ok(Some(self.pipeline.process(task).await)),
            None => Ok(None),
        }
    }

    async fn run_poll_loop(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = interval.tick() => {}
            }

            debug!("Polling for tasks");

            if let Err(e) = self.poll_cycle().await {
                error!("Error during poll cycle: {:#}", e);
            }
        }
    }

    /// Performs a single poll cycle, returning true if a task was dispatched
    async fn poll_cycle(&self) -> poller_store::Result<bool> {
        let names = self.registry.names();
        if names.is_empty() {
            debug!("No handlers registered");
            return Ok(false);
        }

        // Reserve the slot before claiming so a claimed task always has
        // somewhere to run.
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("Max concurrent tasks reached, skipping cycle");
                return Ok(false);
            }
        };

        let Some(task) = self
            .store
            .claim_task(&names, &self.config.task_list)
            .await?
        else {
            debug!("No tasks available");
            return Ok(false);
        };

        info!("Claimed task {} ({})", task.id, task.name);
        self.spawn_task(task, permit);
        Ok(true)
    }

    /// Spawns a tokio task to process one claimed task
    fn spawn_task(&self, task: Task, permit: OwnedSemaphorePermit) {
        let pipeline = self.pipeline.clone();

        tokio::spawn(async move {
            pipeline.process(task).await;
            // Permit is released when dropped
            drop(permit);
        });
    }

    /// Waits until every in-flight task has finished
    async fn drain(&self) {
        let active = self.active_tasks();
        if active > 0 {
            info!("Waiting for {} in-flight task(s)", active);
        }

        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        match self.semaphore.acquire_many(all).await {
            Ok(permits) => drop(permits),
            Err(e) => warn!("Failed to drain in-flight tasks: {}", e),
        }
    }

    /// Starts a background task to send heartbeats
    fn spawn_heartbeat_loop(&self) -> JoinHandle<()> {
        let registration = self.registration.clone();
        let stats = self.stats.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; registration just pinged
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stop| *stop) => break,
                    _ = ticker.tick() => {}
                }

                registration.heartbeat().await;
                registration.publish_handled(&stats.snapshot()).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{async_handler_fn, handler_fn};
    use poller_core::protocol::RESUME_TASK_NAME;
    use poller_core::{Params, ServerState, Step, TaskState, TypeHint};
    use poller_store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::sync::Notify;

    fn test_config() -> AgentPollerConfig {
        AgentPollerConfig::default()
            .with_server_id("srv-test")
            .with_poll_interval(Duration::from_millis(5))
            .with_heartbeat_interval(Duration::from_millis(20))
    }

    fn add_one() -> impl Handler {
        handler_fn(|params| {
            let input = params.get("input").and_then(|v| v.as_i64()).unwrap_or(0);
            Ok([("output".to_string(), json!(input + 1))].into())
        })
    }

    async fn wait_for_tasks(store: &MemoryStore, name: &str, state: TaskState, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let found = store
                .tasks()
                .await
                .iter()
                .filter(|t| t.name == name && t.state == state)
                .count();
            if found >= count {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {} {} task(s) named {}",
                count,
                state,
                name
            );
            time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_poll_once_happy_path() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_step(Step::awaiting("S", "wf-9").with_param("input", json!(41)))
            .await;
        let task = Task::new("AddOne", "wf-9", "S", "default");
        store.insert_task(task.clone()).await;

        let poller = AgentPoller::new(test_config(), store.clone());
        poller.register("AddOne", add_one());

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome, Some(TaskOutcome::Completed));

        assert_eq!(
            store.task(&task.id).await.unwrap().state,
            TaskState::Completed
        );

        let step = store.step("S").await.unwrap();
        let output = &step.attributes.returns["output"];
        assert_eq!(output.value, json!(42));
        assert_eq!(output.type_hint, TypeHint::Long);

        let resumes: Vec<Task> = store
            .tasks()
            .await
            .into_iter()
            .filter(|t| t.name == RESUME_TASK_NAME)
            .collect();
        assert_eq!(resumes.len(), 1);
        assert_eq!(resumes[0].state, TaskState::Pending);
        assert_eq!(resumes[0].task_list_name, "default");
        assert_eq!(
            resumes[0].data,
            Some(json!({"step_id": "S", "workflow_id": "wf-9"}))
        );
        assert_eq!(poller.handled()[0].handled, 1);
    }

    #[tokio::test]
    async fn test_poll_once_records_handler_failure() {
        let store = Arc::new(MemoryStore::new());
        store.insert_step(Step::awaiting("S", "wf")).await;
        let task = Task::new("Explode", "wf", "S", "default");
        store.insert_task(task.clone()).await;

        let poller = AgentPoller::new(test_config(), store.clone());
        poller.register("Explode", handler_fn(|_| Err(anyhow::anyhow!("boom"))));

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome, Some(TaskOutcome::Failed("boom".to_string())));

        let stored = store.task(&task.id).await.unwrap();
        assert_eq!(stored.state, TaskState::Failed);
        assert_eq!(stored.error.unwrap().message, "boom");
    }

    #[tokio::test]
    async fn test_empty_cycles_do_not_mutate_store() {
        let store = Arc::new(MemoryStore::new());
        store.insert_task(Task::new("Foo", "wf", "s1", "default")).await;
        store.insert_task(Task::new("Bar", "wf", "s2", "other")).await;
        let before = store.tasks().await;

        let poller = AgentPoller::new(test_config(), store.clone());

        // No handlers
        assert_eq!(poller.poll_once().await.unwrap(), None);
        assert_eq!(store.tasks().await, before);

        // Handlers, but nothing eligible on this task list
        poller.register("Bar", handler_fn(|p| Ok(p)));
        assert_eq!(poller.poll_once().await.unwrap(), None);
        assert_eq!(store.tasks().await, before);
    }

    #[tokio::test]
    async fn test_poll_once_uses_configured_task_list() {
        let store = Arc::new(MemoryStore::new());
        store.insert_step(Step::awaiting("s1", "wf")).await;
        store.insert_task(Task::new("Foo", "wf", "s1", "blue")).await;

        let poller = AgentPoller::new(test_config().with_task_list("blue"), store.clone());
        poller.register("Foo", handler_fn(|_| Ok(Params::new())));

        assert_eq!(
            poller.poll_once().await.unwrap(),
            Some(TaskOutcome::Completed)
        );
        let resume = store
            .tasks()
            .await
            .into_iter()
            .find(|t| t.name == RESUME_TASK_NAME)
            .unwrap();
        assert_eq!(resume.task_list_name, "blue");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..6 {
            let step_id = format!("s{}", i);
            store.insert_step(Step::awaiting(step_id.clone(), "wf")).await;
            store
                .insert_task(Task::new("Slow", "wf", step_id, "default"))
                .await;
        }

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let poller = Arc::new(AgentPoller::new(
            test_config().with_max_concurrent(2),
            store.clone(),
        ));
        {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            poller.register(
                "Slow",
                async_handler_fn(move |_| {
                    let active = Arc::clone(&active);
                    let peak = Arc::clone(&peak);
                    async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        time::sleep(Duration::from_millis(30)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(Params::new())
                    }
                }),
            );
        }

        let runner = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.start().await }
        });

        wait_for_tasks(&store, "Slow", TaskState::Completed, 6).await;
        poller.stop().await;
        runner.await.unwrap().unwrap();

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1);
        assert!(peak <= 2, "peak concurrency was {}", peak);
        assert_eq!(poller.active_tasks(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_stop_drains_in_flight_task() {
        let store = Arc::new(MemoryStore::new());
        store.insert_step(Step::awaiting("s1", "wf")).await;
        let task = Task::new("Block", "wf", "s1", "default");
        store.insert_task(task.clone()).await;

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let poller = Arc::new(AgentPoller::new(test_config(), store.clone()));
        {
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            poller.register(
                "Block",
                async_handler_fn(move |params| {
                    let entered = Arc::clone(&entered);
                    let release = Arc::clone(&release);
                    async move {
                        entered.notify_one();
                        release.notified().await;
                        Ok::<_, anyhow::Error>(params)
                    }
                }),
            );
        }

        let runner = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.start().await }
        });

        time::timeout(Duration::from_secs(5), entered.notified())
            .await
            .expect("handler never started");

        let stopper = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.stop().await }
        });

        time::sleep(Duration::from_millis(50)).await;
        assert!(!stopper.is_finished());
        assert_eq!(poller.state(), PollerState::Stopping);
        assert_eq!(
            store.server("srv-test").await.unwrap().state,
            ServerState::Running
        );
        assert_eq!(store.task(&task.id).await.unwrap().state, TaskState::Running);

        release.notify_one();
        time::timeout(Duration::from_secs(5), stopper)
            .await
            .expect("stop never returned")
            .unwrap();
        runner.await.unwrap().unwrap();

        assert_eq!(poller.state(), PollerState::Stopped);
        assert_eq!(
            store.task(&task.id).await.unwrap().state,
            TaskState::Completed
        );
        assert_eq!(
            store.server("srv-test").await.unwrap().state,
            ServerState::Shutdown
        );
        assert!(!store.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_registers_and_heartbeats() {
        let store = Arc::new(MemoryStore::new());
        store.insert_step(Step::awaiting("s1", "wf")).await;
        store.insert_task(Task::new("ns.Foo", "wf", "s1", "default")).await;

        let poller = Arc::new(AgentPoller::new(test_config(), store.clone()));
        poller.register("ns.Foo", handler_fn(|_| Ok(Params::new())));

        let runner = tokio::spawn({
            let poller = Arc::clone(&poller);
            async move { poller.start().await }
        });

        wait_for_tasks(&store, "ns.Foo", TaskState::Completed, 1).await;

        // Second start while running is a no-op
        poller.start().await.unwrap();
        assert_eq!(poller.state(), PollerState::Running);

        let deadline = Instant::now() + Duration::from_secs(5);
        let server = loop {
            let server = store.server("srv-test").await.unwrap();
            if server.handled.is_some() {
                break server;
            }
            assert!(Instant::now() < deadline, "handled counters never published");
            time::sleep(Duration::from_millis(5)).await;
        };

        assert_eq!(server.state, ServerState::Running);
        assert_eq!(server.handlers, vec!["ns.Foo".to_string()]);
        assert!(server.ping_time >= server.start_time);
        assert_eq!(
            server.handled,
            Some(vec![HandledCount {
                handler: "ns.Foo".to_string(),
                handled: 1,
                not_handled: 0,
            }])
        );

        poller.stop().await;
        runner.await.unwrap().unwrap();
        assert_eq!(
            store.server("srv-test").await.unwrap().state,
            ServerState::Shutdown
        );
    }

    #[tokio::test]
    async fn test_start_propagates_connection_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_reachable(false);

        let poller = AgentPoller::new(test_config(), store.clone());
        poller.register("Foo", handler_fn(|p| Ok(p)));

        let result = poller.start().await;
        assert!(matches!(result, Err(crate::error::PollerError::Store(_))));
        assert_eq!(poller.state(), PollerState::Stopped);
        assert!(store.server("srv-test").await.is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new());
        let poller = AgentPoller::new(test_config().with_max_concurrent(0), store);

        let result = poller.start().await;
        assert!(matches!(result, Err(crate::error::PollerError::Config(_))));
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[tokio::test]
    async fn test_oversized_concurrency_budget_rejected_at_start() {
        let store = Arc::new(MemoryStore::new());
        let poller = AgentPoller::new(
            test_config().with_max_concurrent(usize::MAX),
            store.clone(),
        );
        assert_eq!(poller.active_tasks(), 0);

        let result = poller.start().await;
        assert!(matches!(result, Err(crate::error::PollerError::Config(_))));
        assert_eq!(poller.state(), PollerState::Stopped);
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn test_poll_once_fails_panicking_handler() {
        let store = Arc::new(MemoryStore::new());
        store.insert_step(Step::awaiting("S", "wf")).await;
        let task = Task::new("Explode", "wf", "S", "default");
        store.insert_task(task.clone()).await;

        let poller = AgentPoller::new(test_config(), store.clone());
        poller.register("Explode", handler_fn(|_| panic!("kaboom")));

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            Some(TaskOutcome::Failed("handler panicked: kaboom".to_string()))
        );
        assert_eq!(store.task(&task.id).await.unwrap().state, TaskState::Failed);
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let poller = AgentPoller::new(test_config(), Arc::new(MemoryStore::new()));
        poller.stop().await;
        assert_eq!(poller.state(), PollerState::Stopped);
    }

    #[test]
    fn test_generated_server_id() {
        let config = AgentPollerConfig::default();
        let a = AgentPoller::new(config.clone(), Arc::new(MemoryStore::new()));
        let b = AgentPoller::new(config, Arc::new(MemoryStore::new()));
        assert_ne!(a.server_id(), b.server_id());
        assert!(!a.server_id().is_empty());
    }
}
