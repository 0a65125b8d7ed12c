//! Task poller: executes assigned tasks and reports how they ended.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::config::PollerConfig;
use super::poller::{PollSource, PollerState, PollerStatus, panic_message};
use crate::client::{PollRequest, TaskAssignment, WorkflowClient};
use crate::error::{Error, Result};
use crate::task::{TaskContext, TaskOutcome, TaskRegistry};

/// Polls tasks and runs each with the executor registered for its type.
///
/// # Lifecycle
///
/// 1. Long poll for a task assignment
/// 2. Look up the executor by task type
/// 3. Run it; an error or panic becomes a failure outcome
/// 4. Report completed, failed or canceled, with reason and details
///    truncated to what the service accepts
///
/// Nothing a task does stops the poller. A task of an unregistered type is
/// reported as failed.
pub struct TaskWorker {
    client: Arc<dyn WorkflowClient>,
    registry: Arc<TaskRegistry>,
    request: PollRequest,
}

impl TaskWorker {
    pub fn new(
        client: Arc<dyn WorkflowClient>,
        registry: Arc<TaskRegistry>,
        config: &PollerConfig,
    ) -> Self {
        Self {
            client,
            registry,
            request: config.poll_request(),
        }
    }

    pub fn request(&self) -> &PollRequest {
        &self.request
    }

    async fn execute(&self, assignment: &TaskAssignment) -> TaskOutcome {
        let Some(entry) = self.registry.get(&assignment.task_type) else {
            warn!(
                task_id = %assignment.task_id,
                task_type = %assignment.task_type,
                "No executor registered for task type"
            );
            return TaskOutcome::failed(
                format!("unknown task type {}", assignment.task_type),
                None,
            );
        };

        let ctx = TaskContext::new(
            assignment.clone(),
            Arc::clone(&self.client),
            self.request.identity.clone(),
        );

        // Run on its own task so a panicking executor cannot take the poller down.
        match tokio::spawn(async move { entry.run(&ctx).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => TaskOutcome::failed(
                "task executor panicked",
                Some(panic_message(e.into_panic())),
            ),
            Err(e) => TaskOutcome::failed("task execution was canceled", Some(e.to_string())),
        }
    }

    async fn report(&self, task_token: &str, outcome: &TaskOutcome) -> Result<()> {
        match outcome {
            TaskOutcome::Completed(result) => {
                self.client
                    .respond_task_completed(task_token, result.as_deref())
                    .await?
            }
            TaskOutcome::Failed { reason, details } => {
                self.client
                    .respond_task_failed(task_token, reason.as_deref(), details.as_deref())
                    .await?
            }
            TaskOutcome::CancellationRequested { details } => {
                self.client
                    .respond_task_canceled(task_token, details.as_deref())
                    .await?
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PollSource for TaskWorker {
    type Unit = TaskAssignment;

    fn kind(&self) -> &'static str {
        "task"
    }

    fn identity(&self) -> &str {
        &self.request.identity
    }

    async fn poll(&self) -> Result<Option<TaskAssignment>> {
        Ok(self.client.poll_for_task(&self.request).await?)
    }

    async fn process(&self, assignment: TaskAssignment, status: &PollerStatus) -> Result<()> {
        status.set(PollerState::Executing);
        debug!(
            task_id = %assignment.task_id,
            task_type = %assignment.task_type,
            workflow = %assignment.execution,
            "Executing task"
        );

        let outcome = self.execute(&assignment).await.truncated();

        status.set(PollerState::Reporting);
        self.report(&assignment.task_token, &outcome).await?;

        match &outcome {
            TaskOutcome::Completed(_) => info!(
                task_id = %assignment.task_id,
                task_type = %assignment.task_type,
                "Task completed"
            ),
            TaskOutcome::Failed { reason, .. } => warn!(
                task_id = %assignment.task_id,
                task_type = %assignment.task_type,
                reason = reason.as_deref().unwrap_or_default(),
                "Task failed"
            ),
            TaskOutcome::CancellationRequested { .. } => info!(
                task_id = %assignment.task_id,
                task_type = %assignment.task_type,
                "Task canceled"
            ),
        }
        Ok(())
    }

    fn is_fatal(&self, _error: &Error) -> bool {
        false
    }
}
