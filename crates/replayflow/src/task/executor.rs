use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::{TaskContext, TaskOutcome};
use crate::error::BoxError;

/// Executes tasks of one registered type.
///
/// Returning `Err` is reported to the service as a task failure: the error's
/// `Display` becomes the reason and its type name plus `Debug` the details.
/// Cancellation is not an error; return
/// [`TaskOutcome::CancellationRequested`] after a heartbeat reports it.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use replayflow::{Heartbeat, TaskContext, TaskExecutor, TaskOutcome};
///
/// struct Resize;
///
/// #[async_trait]
/// impl TaskExecutor for Resize {
///     type Error = std::io::Error;
///
///     async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, Self::Error> {
///         if ctx.heartbeat(Some("starting")).await.ok() == Some(Heartbeat::CancelRequested) {
///             return Ok(TaskOutcome::CancellationRequested { details: None });
///         }
///         Ok(TaskOutcome::Completed(ctx.input().map(str::to_uppercase)))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    type Error: fmt::Display + fmt::Debug + Send + 'static;

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, Self::Error>;
}

/// Adapts an async closure into a [`TaskExecutor`]. See [`task_fn`].
pub struct FnExecutor<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

/// Build an executor from an async closure taking an owned context.
pub fn task_fn<F, Fut>(f: F) -> FnExecutor<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutcome, BoxError>> + Send + 'static,
{
    FnExecutor {
        f,
        _marker: PhantomData,
    }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F, Fut>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TaskOutcome, BoxError>> + Send + 'static,
{
    type Error = BoxError;

    async fn execute(&self, ctx: &TaskContext) -> Result<TaskOutcome, Self::Error> {
        (self.f)(ctx.clone()).await
    }
}

/// Type-erased executor stored in the task registry.
#[async_trait]
pub(crate) trait ExecutorEntry: Send + Sync {
    /// Run the executor, turning an error into a failure outcome.
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome;
}

/// Executor entry that keeps the concrete executor type.
pub(crate) struct TypedExecutorEntry<E>(pub(crate) E);

#[async_trait]
impl<E> ExecutorEntry for TypedExecutorEntry<E>
where
    E: TaskExecutor,
{
    async fn run(&self, ctx: &TaskContext) -> TaskOutcome {
        match self.0.execute(ctx).await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Failed {
                reason: Some(e.to_string()),
                details: Some(format!("{}: {e:?}", type_name::<E::Error>())),
            },
        }
    }
}
