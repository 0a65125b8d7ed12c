//! Worker runtime and its builder.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::config::{PollerConfig, RuntimeConfig};
use super::decision_worker::DecisionWorker;
use super::poller::{Poller, panic_message};
use super::task_worker::TaskWorker;
use crate::client::WorkflowClient;
use crate::dispatch::HandlerRegistry;
use crate::error::{Error, Result};
use crate::event::TaskType;
use crate::task::{TaskExecutor, TaskRegistry, TaskRegistryBuilder};

/// Builder for a [`WorkerRuntime`].
pub struct WorkerRuntimeBuilder {
    client: Arc<dyn WorkflowClient>,
    handlers: Option<Arc<HandlerRegistry>>,
    tasks: TaskRegistryBuilder,
    config: RuntimeConfig,
}

impl WorkerRuntimeBuilder {
    fn new(client: Arc<dyn WorkflowClient>) -> Self {
        Self {
            client,
            handlers: None,
            tasks: TaskRegistry::builder(),
            config: RuntimeConfig::default(),
        }
    }

    /// Decide workflows with `handlers`.
    ///
    /// Without handlers the runtime starts no decision pollers.
    pub fn handlers(self, handlers: HandlerRegistry) -> Self {
        self.shared_handlers(Arc::new(handlers))
    }

    /// Like [`handlers`](Self::handlers), for a registry shared elsewhere.
    pub fn shared_handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Execute tasks of `task_type` with `executor`.
    ///
    /// Defers duplicate task type checks until build time. Without any
    /// executor the runtime starts no task pollers.
    pub fn register_task<E>(mut self, task_type: TaskType, executor: E) -> Self
    where
        E: TaskExecutor,
    {
        self.tasks = self.tasks.register(task_type, executor);
        self
    }

    /// Set the runtime configuration.
    ///
    /// If not called, uses [`RuntimeConfig::default()`].
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// [`Error::DuplicateExecutor`] if a task type was registered twice.
    pub fn build(self) -> Result<WorkerRuntime> {
        let tasks = self.tasks.build()?;
        let identity = self
            .config
            .identity
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(WorkerRuntime {
            client: self.client,
            handlers: self.handlers,
            tasks: Arc::new(tasks),
            config: self.config,
            identity,
        })
    }
}

/// Runs decision and task pollers against one workflow service.
///
/// # Lifecycle
///
/// 1. Create with [`WorkerRuntime::builder(client)`](WorkerRuntime::builder)
/// 2. Add handlers with [`WorkerRuntimeBuilder::handlers()`]
/// 3. Register executors with [`WorkerRuntimeBuilder::register_task()`]
/// 4. Configure with [`WorkerRuntimeBuilder::config()`]
/// 5. Build with [`WorkerRuntimeBuilder::build()`]
/// 6. Run with [`WorkerRuntime::run()`]
pub struct WorkerRuntime {
    client: Arc<dyn WorkflowClient>,
    handlers: Option<Arc<HandlerRegistry>>,
    tasks: Arc<TaskRegistry>,
    config: RuntimeConfig,
    identity: String,
}

impl std::fmt::Debug for WorkerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRuntime")
            .field("identity", &self.identity)
            .field("handlers", &self.handlers)
            .field("tasks", &self.tasks)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkerRuntime {
    pub fn builder(client: Arc<dyn WorkflowClient>) -> WorkerRuntimeBuilder {
        WorkerRuntimeBuilder::new(client)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Base identity of every poller.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Decision pollers [`run`](Self::run) starts.
    pub fn decision_poller_count(&self) -> usize {
        if self.handlers.is_some() {
            self.config.decision_pollers
        } else {
            0
        }
    }

    /// Task pollers [`run`](Self::run) starts.
    pub fn task_poller_count(&self) -> usize {
        if self.tasks.is_empty() {
            0
        } else {
            self.config.task_pollers
        }
    }

    /// Run every poller until `shutdown` completes or a poller fails.
    ///
    /// # Shutdown Behavior
    ///
    /// When the shutdown future completes:
    /// 1. All pollers stop polling
    /// 2. In-flight units get up to `shutdown_timeout` to finish
    /// 3. Return cleanly after timeout
    ///
    /// # Errors
    ///
    /// The error of the first poller that stopped on its own, for instance
    /// a decision poller whose handler failed.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use tokio::signal;
    ///
    /// let runtime = WorkerRuntime::builder(client)
    ///     .handlers(handlers)
    ///     .register_task(TaskType::new("charge", "1"), ChargeCard)
    ///     .build()?;
    ///
    /// // Run until Ctrl+C
    /// runtime.run(async { signal::ctrl_c().await.ok(); }).await?;
    /// ```
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let decision_pollers = self.decision_poller_count();
        let task_pollers = self.task_poller_count();

        info!(
            identity = %self.identity,
            decision_pollers,
            task_pollers,
            task_types = self.tasks.len(),
            "Runtime starting"
        );

        let mut pollers = JoinSet::new();

        if let Some(handlers) = &self.handlers {
            for i in 0..decision_pollers {
                let config = self.poller_config("decision", i, decision_pollers);
                let worker =
                    DecisionWorker::new(Arc::clone(&self.client), Arc::clone(handlers), &config);
                pollers.spawn(Poller::new(worker, config).run(shutdown_rx.clone()));
            }
        }

        for i in 0..task_pollers {
            let config = self.poller_config("task", i, task_pollers);
            let worker = TaskWorker::new(Arc::clone(&self.client), Arc::clone(&self.tasks), &config);
            pollers.spawn(Poller::new(worker, config).run(shutdown_rx.clone()));
        }

        tokio::pin!(shutdown);
        let mut result = Ok(());

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                joined = pollers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        error!(identity = %self.identity, error = %e, "Poller failed, stopping runtime");
                        result = Err(e);
                        break;
                    }
                    Some(Err(e)) => {
                        let message = if e.is_panic() {
                            panic_message(e.into_panic())
                        } else {
                            e.to_string()
                        };
                        error!(identity = %self.identity, error = %message, "Poller panicked, stopping runtime");
                        result = Err(Error::UnitPanicked { kind: "poller", message });
                        break;
                    }
                },
            }
        }

        // Signal shutdown to all pollers
        shutdown_tx.send_replace(true);

        let shutdown_timeout = self.config.poller.shutdown_timeout;
        let all_pollers = async { while pollers.join_next().await.is_some() {} };

        match tokio::time::timeout(shutdown_timeout, all_pollers).await {
            Ok(()) => {
                info!(identity = %self.identity, "Runtime stopped gracefully");
            }
            Err(_) => {
                warn!(
                    identity = %self.identity,
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Shutdown timeout exceeded, forcing stop"
                );
            }
        }

        result
    }

    fn poller_config(&self, kind: &str, index: usize, count: usize) -> PollerConfig {
        let identity = if count == 1 {
            format!("{}-{kind}", self.identity)
        } else {
            format!("{}-{kind}-{index}", self.identity)
        };

        PollerConfig {
            identity: Some(identity),
            ..self.config.poller.clone()
        }
    }
}
