//! Client-side workflow orchestration over a remote history service.
//!
//! Replayflow drives workflows whose state lives entirely in an external
//! service's event history:
//!
//! - **Replayed decisions** — every decision task delivers the workflow's
//!   full history; handlers react to the new events and emit decisions
//! - **Event routing** — each event goes to the handler registered for its
//!   `(event type, context name)` pair, such as a task type or timer id
//! - **Durable retries** — failed tasks are retried on a timer, with the
//!   attempt count kept in history markers
//! - **Remote execution** — task pollers run user executors and report
//!   results back to the service
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Decision cycle (DecisionWorker)                    │
//! │                                                                         │
//! │   1. Long poll a decision task, following every history page           │
//! │   2. Build the EventLog (newest first, deduplicated)                    │
//! │   3. For each new event, oldest first:                                  │
//! │        a. close-decision recovery                                       │
//! │        b. retry interception                                            │
//! │        c. the registered handler                                        │
//! │   4. Submit the DecisionBatch in one response                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Task cycle (TaskWorker)                           │
//! │                                                                         │
//! │   1. Long poll a task assignment                                        │
//! │   2. Run the executor registered for its task type                      │
//! │   3. Report completed, failed or canceled                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use replayflow::{ContextName, EventType, HandlerRegistry, TaskType, task_fn, TaskOutcome};
//! use replayflow::runtime::WorkerRuntime;
//!
//! let charge = TaskType::new("charge", "1");
//!
//! let handlers = HandlerRegistry::builder()
//!     .on(EventType::WorkflowExecutionStarted, ContextName::workflow("order", "1"), {
//!         let charge = charge.clone();
//!         move |ctx, decisions| {
//!             decisions.schedule_task(charge.clone(), ctx.input()?.map(String::from));
//!             Ok(())
//!         }
//!     })
//!     .on(EventType::TaskCompleted, ContextName::Task(charge.clone()), |ctx, decisions| {
//!         decisions.complete_workflow(ctx.output()?.map(String::from))?;
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let runtime = WorkerRuntime::builder(client)
//!     .handlers(handlers)
//!     .register_task(charge, task_fn(|ctx| async move {
//!         Ok(TaskOutcome::completed(format!("charged {}", ctx.input().unwrap_or("0"))))
//!     }))
//!     .build()?;
//!
//! runtime.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! ```
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

pub mod client;
pub mod close;
mod codec;
pub mod decision;
pub mod dispatch;
mod error;
pub mod event;
mod options;
pub mod retry;
pub mod runtime;
pub mod task;

pub use client::{
    DecisionTask, DecisionTaskPage, HeartbeatResponse, PollRequest, RemoteError, RemoteResult,
    TaskAssignment, WorkflowClient,
};
pub use close::{CLOSE_CONTROL_MARKER, CloseWorkflowControl};
pub use codec::ControlPayload;
pub use decision::{Decision, DecisionBatch, DecisionBuilder, TaskRequest};
pub use dispatch::{Dispatcher, EventHandler, HandlerRegistry, HandlerRegistryBuilder};
pub use error::{BoxError, Error, Result};
pub use event::{
    ContextName, EventAttributes, EventCategory, EventContext, EventLog, EventType, Facet,
    TaskState, TaskType, WorkflowEvent, WorkflowExecution, WorkflowInfo, WorkflowType,
};
pub use options::{NO_TIMEOUT, TaskOptions, Timeout, WorkflowOptions};
pub use retry::{RetryControl, RetryPolicies, RetryPolicy};
pub use runtime::{RuntimeConfig, WorkerRuntime};
pub use task::{Heartbeat, TaskContext, TaskExecutor, TaskOutcome, TaskRegistry, task_fn};
