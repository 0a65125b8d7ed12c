//! Handler registration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::decision::DecisionBuilder;
use crate::error::{BoxError, Error, Result};
use crate::event::{ContextName, EventContext, EventType, TaskType};
use crate::options::TaskOptions;
use crate::retry::{RetryPolicies, RetryPolicy};

/// Reacts to one kind of history event by adding decisions.
///
/// Handlers run synchronously, one event at a time, oldest first. An error
/// aborts the whole decision cycle; nothing is submitted for it.
pub trait EventHandler: Send + Sync {
    fn handle(
        &self,
        ctx: &EventContext<'_>,
        decisions: &mut DecisionBuilder,
    ) -> std::result::Result<(), BoxError>;
}

/// Adapts a closure into an [`EventHandler`].
pub struct FnHandler<F>(F);

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&EventContext<'_>, &mut DecisionBuilder) -> std::result::Result<(), BoxError>
        + Send
        + Sync,
{
    fn handle(
        &self,
        ctx: &EventContext<'_>,
        decisions: &mut DecisionBuilder,
    ) -> std::result::Result<(), BoxError> {
        (self.0)(ctx, decisions)
    }
}

/// Registry key: the event type plus the dispatch key within its category.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerKey {
    pub event_type: EventType,
    pub name: ContextName,
}

/// Read-only mapping from [`HandlerKey`] to handler, plus retry and task
/// defaults. Built once and shared by every decision poller.
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Box<dyn EventHandler>>,
    retry_policies: RetryPolicies,
    task_defaults: Arc<HashMap<TaskType, TaskOptions>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("retry_policies", &self.retry_policies)
            .field("task_defaults", &self.task_defaults)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// The handler registered for `event_type` under `name`.
    pub fn get(&self, event_type: EventType, name: &ContextName) -> Option<&dyn EventHandler> {
        let key = HandlerKey {
            event_type,
            name: name.clone(),
        };
        self.handlers.get(&key).map(|handler| handler.as_ref())
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn retry_policies(&self) -> &RetryPolicies {
        &self.retry_policies
    }

    /// A fresh builder for one decision cycle, carrying the task defaults.
    pub fn decision_builder(&self) -> DecisionBuilder {
        DecisionBuilder::with_task_defaults(Arc::clone(&self.task_defaults))
    }
}

/// Builder for a [`HandlerRegistry`].
///
/// Registration problems are remembered and reported by
/// [`build`](Self::build), so registrations can be chained.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use replayflow::{ContextName, EventType, HandlerRegistry, RetryPolicy, TaskType};
///
/// let charge = TaskType::new("charge", "1");
/// let registry = HandlerRegistry::builder()
///     .on(
///         EventType::WorkflowExecutionStarted,
///         ContextName::workflow("order", "1"),
///         move |ctx, decisions| {
///             decisions.schedule_task(TaskType::new("charge", "1"), ctx.input()?.map(String::from));
///             Ok(())
///         },
///     )
///     .on(
///         EventType::TaskCompleted,
///         ContextName::Task(charge.clone()),
///         |ctx, decisions| {
///             decisions.complete_workflow(ctx.output()?.map(String::from))?;
///             Ok(())
///         },
///     )
///     .retry_policy(charge, RetryPolicy::constant_delay(Duration::from_secs(5), 3))
///     .build()
///     .unwrap();
///
/// assert_eq!(registry.len(), 2);
/// ```
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<HandlerKey, Box<dyn EventHandler>>,
    rejected: Option<Error>,
    retry_policies: RetryPolicies,
    task_defaults: HashMap<TaskType, TaskOptions>,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for events of `event_type` keyed by `name`.
    ///
    /// Each key can be registered once; `name` must be of the shape
    /// `event_type`'s category is keyed by.
    pub fn register<H>(mut self, event_type: EventType, name: ContextName, handler: H) -> Self
    where
        H: EventHandler + 'static,
    {
        if self.rejected.is_some() {
            return self;
        }
        if name.category() != event_type.category() {
            self.rejected = Some(Error::InvalidHandlerKey { event_type, name });
            return self;
        }

        let key = HandlerKey { event_type, name };
        if self.handlers.contains_key(&key) {
            self.rejected = Some(Error::DuplicateHandler {
                event_type: key.event_type,
                name: key.name,
            });
            return self;
        }
        self.handlers.insert(key, Box::new(handler));
        self
    }

    /// Register a closure as the handler for `event_type` keyed by `name`.
    pub fn on<F>(self, event_type: EventType, name: ContextName, handler: F) -> Self
    where
        F: Fn(&EventContext<'_>, &mut DecisionBuilder) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.register(event_type, name, FnHandler(handler))
    }

    /// Retry failed or timed-out tasks of `task_type` according to `policy`.
    pub fn retry_policy(mut self, task_type: TaskType, policy: RetryPolicy) -> Self {
        self.retry_policies.set(task_type, policy);
        self
    }

    /// Policy for task types without their own. Defaults to [`RetryPolicy::NoRetry`].
    pub fn default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policies.set_default(policy);
        self
    }

    /// Options applied to every schedule of `task_type` unless overridden per call.
    pub fn task_defaults(mut self, task_type: TaskType, options: TaskOptions) -> Self {
        self.task_defaults.insert(task_type, options);
        self
    }

    /// Build the registry.
    ///
    /// # Errors
    ///
    /// The first [`Error::DuplicateHandler`] or [`Error::InvalidHandlerKey`]
    /// met during registration.
    pub fn build(self) -> Result<HandlerRegistry> {
        if let Some(err) = self.rejected {
            return Err(err);
        }
        Ok(HandlerRegistry {
            handlers: self.handlers,
            retry_policies: self.retry_policies,
            task_defaults: Arc::new(self.task_defaults),
        })
    }
}
