//! Runtime for polling and processing work.
//!
//! - [`WorkerRuntime`] — Main coordinator that runs decision and task pollers
//! - [`WorkerRuntimeBuilder`] — Builder for handlers, executors and configuration
//! - [`Poller`] — The poll / process / report loop, usable on its own
//! - [`RuntimeConfig`] / [`PollerConfig`] — Poller counts, timeouts, concurrency
//!
//! # Example
//!
//! ```ignore
//! use replayflow::runtime::{RuntimeConfig, WorkerRuntime};
//!
//! let runtime = WorkerRuntime::builder(client)
//!     .handlers(order_handlers)
//!     .register_task(TaskType::new("charge", "1"), ChargeCard)
//!     .config(RuntimeConfig::default())
//!     .build()?;
//!
//! runtime.run(shutdown_signal).await?;
//! ```

mod config;
mod decision_worker;
mod poller;
mod registry;
mod task_worker;

pub use config::{ConsumeMode, DEFAULT_TASK_LIST, PollerConfig, RuntimeConfig};
pub use decision_worker::DecisionWorker;
pub use poller::{PollSource, Poller, PollerHandle, PollerState, PollerStatus};
pub use registry::{WorkerRuntime, WorkerRuntimeBuilder};
pub use task_worker::TaskWorker;
