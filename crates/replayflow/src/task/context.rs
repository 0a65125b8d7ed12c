use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::client::{TaskAssignment, WorkflowClient};
use crate::error::Result;
use crate::event::{TaskType, WorkflowExecution};

/// What a heartbeat reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    /// Keep working.
    Continue,
    /// The workflow asked for the task to be canceled. The executor should
    /// stop and return [`TaskOutcome::CancellationRequested`](super::TaskOutcome::CancellationRequested).
    CancelRequested,
}

/// Context passed to a [`TaskExecutor`](super::TaskExecutor).
///
/// Provides the assignment being executed and a heartbeat channel back to
/// the service. Cloning is cheap.
#[derive(Clone)]
pub struct TaskContext {
    assignment: TaskAssignment,
    client: Arc<dyn WorkflowClient>,
    identity: String,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("assignment", &self.assignment)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl TaskContext {
    pub fn new(
        assignment: TaskAssignment,
        client: Arc<dyn WorkflowClient>,
        identity: impl Into<String>,
    ) -> Self {
        Self {
            assignment,
            client,
            identity: identity.into(),
        }
    }

    /// Task instance id chosen when the task was scheduled.
    pub fn task_id(&self) -> &str {
        &self.assignment.task_id
    }

    pub fn task_type(&self) -> &TaskType {
        &self.assignment.task_type
    }

    pub fn input(&self) -> Option<&str> {
        self.assignment.input.as_deref()
    }

    /// The workflow run that scheduled this task.
    pub fn execution(&self) -> &WorkflowExecution {
        &self.assignment.execution
    }

    pub fn task_token(&self) -> &str {
        &self.assignment.task_token
    }

    /// Identity of the worker executing this task.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn assignment(&self) -> &TaskAssignment {
        &self.assignment
    }

    /// Report progress and learn whether cancellation was requested.
    ///
    /// # Errors
    ///
    /// [`Error::Remote`](crate::Error::Remote) if the heartbeat call fails.
    pub async fn heartbeat(&self, details: Option<&str>) -> Result<Heartbeat> {
        let response = self
            .client
            .record_task_heartbeat(&self.assignment.task_token, details)
            .await?;

        if response.cancel_requested {
            debug!(
                task_id = %self.assignment.task_id,
                task_type = %self.assignment.task_type,
                "Cancellation requested"
            );
            Ok(Heartbeat::CancelRequested)
        } else {
            Ok(Heartbeat::Continue)
        }
    }
}
