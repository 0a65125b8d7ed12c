//! Task execution on the worker side.
//!
//! - [`TaskExecutor`] — user code for one task type
//! - [`TaskContext`] — the assignment plus heartbeats
//! - [`TaskOutcome`] — completed, failed, or canceled on request
//! - [`TaskRegistry`] — executors keyed by task type

mod context;
mod executor;

use std::collections::HashMap;
use std::sync::Arc;

pub use context::{Heartbeat, TaskContext};
pub(crate) use executor::ExecutorEntry;
pub use executor::{FnExecutor, TaskExecutor, task_fn};

use crate::error::{Error, Result};
use crate::event::TaskType;
use executor::TypedExecutorEntry;

/// Longest failure reason the service accepts, in characters.
pub const MAX_REASON_LENGTH: usize = 256;

/// Longest failure or cancellation details the service accepts, in characters.
pub const MAX_DETAILS_LENGTH: usize = 32_768;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task finished, with an optional result.
    Completed(Option<String>),
    /// The task failed.
    Failed {
        reason: Option<String>,
        details: Option<String>,
    },
    /// The task stopped because the workflow asked for its cancellation.
    CancellationRequested { details: Option<String> },
}

impl TaskOutcome {
    pub fn completed(result: impl Into<String>) -> Self {
        TaskOutcome::Completed(Some(result.into()))
    }

    pub fn failed(reason: impl Into<String>, details: Option<String>) -> Self {
        TaskOutcome::Failed {
            reason: Some(reason.into()),
            details,
        }
    }

    /// Clip reason and details to what the service accepts.
    pub fn truncated(self) -> Self {
        match self {
            TaskOutcome::Failed { reason, details } => TaskOutcome::Failed {
                reason: reason.map(|r| truncate(r, MAX_REASON_LENGTH)),
                details: details.map(|d| truncate(d, MAX_DETAILS_LENGTH)),
            },
            TaskOutcome::CancellationRequested { details } => TaskOutcome::CancellationRequested {
                details: details.map(|d| truncate(d, MAX_DETAILS_LENGTH)),
            },
            completed => completed,
        }
    }
}

/// Keep at most `max_chars` characters of `text`.
pub fn truncate(mut text: String, max_chars: usize) -> String {
    if let Some((end, _)) = text.char_indices().nth(max_chars) {
        text.truncate(end);
    }
    text
}

/// Executors keyed by task type. Built once, shared by every task poller.
pub struct TaskRegistry {
    executors: HashMap<TaskType, Arc<dyn ExecutorEntry>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("task_types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    pub(crate) fn get(&self, task_type: &TaskType) -> Option<Arc<dyn ExecutorEntry>> {
        self.executors.get(task_type).map(Arc::clone)
    }

    /// Returns `true` if an executor is registered for `task_type`.
    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.executors.contains_key(task_type)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

/// Builder for a [`TaskRegistry`]. Duplicates are reported at build time.
#[derive(Default)]
pub struct TaskRegistryBuilder {
    executors: HashMap<TaskType, Arc<dyn ExecutorEntry>>,
    duplicate_task_type: Option<TaskType>,
}

impl TaskRegistryBuilder {
    /// Register `executor` for `task_type`. Each type can be registered once.
    pub fn register<E>(mut self, task_type: TaskType, executor: E) -> Self
    where
        E: TaskExecutor,
    {
        if self.executors.contains_key(&task_type) {
            if self.duplicate_task_type.is_none() {
                self.duplicate_task_type = Some(task_type);
            }
            return self;
        }
        self.executors
            .insert(task_type, Arc::new(TypedExecutorEntry(executor)));
        self
    }

    /// # Errors
    ///
    /// [`Error::DuplicateExecutor`] if a task type was registered twice.
    pub fn build(self) -> Result<TaskRegistry> {
        if let Some(task_type) = self.duplicate_task_type {
            return Err(Error::DuplicateExecutor(task_type));
        }
        Ok(TaskRegistry {
            executors: self.executors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(300);
        let clipped = truncate(text, MAX_REASON_LENGTH);

        assert_eq!(clipped.chars().count(), MAX_REASON_LENGTH);
        assert_eq!(truncate("short".into(), MAX_REASON_LENGTH), "short");
    }

    #[test]
    fn failures_are_clipped() {
        let outcome = TaskOutcome::Failed {
            reason: Some("r".repeat(1000)),
            details: Some("d".repeat(40_000)),
        }
        .truncated();

        let TaskOutcome::Failed { reason, details } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(reason.map(|r| r.len()), Some(MAX_REASON_LENGTH));
        assert_eq!(details.map(|d| d.len()), Some(MAX_DETAILS_LENGTH));
    }

    #[test]
    fn results_are_not_clipped() {
        let long = "x".repeat(MAX_DETAILS_LENGTH + 1);
        let outcome = TaskOutcome::completed(long.clone()).truncated();

        assert_eq!(outcome, TaskOutcome::Completed(Some(long)));
    }

    #[test]
    fn duplicate_executor_is_rejected() {
        let echo = || {
            task_fn(|_ctx: TaskContext| async { Ok::<_, BoxError>(TaskOutcome::Completed(None)) })
        };
        let err = TaskRegistry::builder()
            .register(TaskType::new("echo", "1"), echo())
            .register(TaskType::new("echo", "1"), echo())
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::DuplicateExecutor(t) if t.name == "echo"));
    }
}
