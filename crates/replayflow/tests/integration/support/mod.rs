use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use replayflow::{BoxError, DecisionBuilder, EventContext, EventType, TaskType, WorkflowType};

/// Initialize tracing for tests. Safe to call multiple times.
///
/// The `try_init()` call is idempotent - subsequent calls are no-ops if
/// already initialized.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("replayflow=debug")
        .with_test_writer()
        .try_init();
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll `check` until it yields a value or `timeout` elapses.
pub async fn wait_until<F, Fut, T>(timeout: Duration, interval: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await? {
            return Ok(result);
        }

        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }

        tokio::time::sleep(interval).await;
    }
}

pub fn order_workflow() -> WorkflowType {
    WorkflowType::new("order", "1")
}

pub fn charge_task() -> TaskType {
    TaskType::new("charge", "1")
}

/// What a handler saw of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub event_type: EventType,
    pub input: Option<String>,
    pub output: Option<String>,
    pub task_type: Option<TaskType>,
    pub timer_id: Option<String>,
    pub control: Option<String>,
}

/// Records every event its handlers are invoked with.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Recorder {
    /// Facets an event does not carry are recorded as `None`.
    pub fn record(&self, ctx: &EventContext<'_>) -> Result<(), BoxError> {
        let seen = Seen {
            event_type: ctx.event_type(),
            input: ctx.input().ok().flatten().map(String::from),
            output: ctx.output().ok().flatten().map(String::from),
            task_type: ctx.task_type().ok().cloned(),
            timer_id: ctx.timer_id().ok().map(String::from),
            control: ctx.control().ok().flatten().map(String::from),
        };
        self.seen.lock().unwrap().push(seen);
        Ok(())
    }

    /// A handler that only records.
    pub fn handler(
        &self,
    ) -> impl Fn(&EventContext<'_>, &mut DecisionBuilder) -> Result<(), BoxError>
    + Send
    + Sync
    + 'static {
        let recorder = self.clone();
        move |ctx, _decisions| recorder.record(ctx)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.event_type == event_type)
            .count()
    }
}
