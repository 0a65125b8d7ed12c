//! The generic poll / process / report loop shared by decision and task
//! pollers.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::config::{ConsumeMode, PollerConfig};
use crate::error::{Error, Result};
use crate::options::millis;

/// What a poller is doing right now.
///
/// With a concurrency above 1 this is the most recent transition of any
/// in-flight unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Dispatching,
    Executing,
    Reporting,
    Stopped,
}

/// Shared, observable state of one poller.
#[derive(Debug, Clone)]
pub struct PollerStatus(Arc<watch::Sender<PollerState>>);

impl PollerStatus {
    fn new() -> Self {
        let (sender, _) = watch::channel(PollerState::Idle);
        Self(Arc::new(sender))
    }

    pub fn set(&self, state: PollerState) {
        self.0.send_replace(state);
    }

    pub fn get(&self) -> PollerState {
        *self.0.borrow()
    }

    /// A receiver notified of every state change.
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.0.subscribe()
    }
}

/// Something a [`Poller`] can long-poll and process units of work from.
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    /// One unit of work, such as a decision task or a task assignment.
    type Unit: Send + 'static;

    /// Short name used in logs and errors.
    fn kind(&self) -> &'static str;

    /// Identity reported to the service.
    fn identity(&self) -> &str;

    /// One long poll. `Ok(None)` means nothing was available.
    async fn poll(&self) -> Result<Option<Self::Unit>>;

    /// Process one unit and report its result.
    async fn process(&self, unit: Self::Unit, status: &PollerStatus) -> Result<()>;

    /// Whether an error from [`process`](Self::process) stops the poller.
    fn is_fatal(&self, error: &Error) -> bool;
}

/// Repeatedly polls a [`PollSource`] and processes what it yields.
///
/// At most `concurrency` units are in flight. Each unit is processed and
/// reported in full before its slot frees up.
///
/// # Lifecycle
///
/// 1. Wait for a free slot
/// 2. Long poll, bounded by `poll_timeout` if set
/// 3. Hand the unit to a spawned task that processes and reports it
/// 4. Repeat until stopped, the source fails fatally, or (in
///    [`ConsumeMode::FailFast`]) a poll yields nothing
/// 5. Wait up to `shutdown_timeout` for in-flight units
pub struct Poller<S: PollSource> {
    source: Arc<S>,
    config: PollerConfig,
    status: PollerStatus,
}

impl<S: PollSource> Poller<S> {
    pub fn new(source: S, config: PollerConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            status: PollerStatus::new(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.status.get()
    }

    pub fn status(&self) -> &PollerStatus {
        &self.status
    }

    /// Poll once and, if a unit arrives, process it before returning.
    ///
    /// Returns `true` if a unit was processed.
    ///
    /// # Errors
    ///
    /// - Any poll or processing error
    /// - [`Error::NoUnitAvailable`] in [`ConsumeMode::FailFast`] when the
    ///   poll yields nothing
    pub async fn poll_once(&self) -> Result<bool> {
        self.status.set(PollerState::Polling);
        let polled = self.poll_bounded().await;

        let unit = match polled {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                self.status.set(PollerState::Idle);
                return match self.config.consume_mode {
                    ConsumeMode::Repeat => Ok(false),
                    ConsumeMode::FailFast => Err(Error::NoUnitAvailable(self.source.kind())),
                };
            }
            Err(e) => {
                self.status.set(PollerState::Idle);
                return Err(e);
            }
        };

        let result = self.source.process(unit, &self.status).await;
        self.status.set(PollerState::Idle);
        result.map(|()| true)
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// # Errors
    ///
    /// - A fatal processing error, as judged by [`PollSource::is_fatal`]
    /// - [`Error::UnitPanicked`] if processing panicked and that is fatal
    /// - [`Error::NoUnitAvailable`] or the poll error in
    ///   [`ConsumeMode::FailFast`]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight: JoinSet<Result<()>> = JoinSet::new();

        info!(
            identity = %self.source.identity(),
            kind = self.source.kind(),
            concurrency,
            "Poller started"
        );

        let result = 'run: loop {
            let permit = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break 'run Ok(()),
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = self.settle(joined) {
                        break 'run Err(e);
                    }
                    continue 'run;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break 'run Ok(()),
                },
            };

            self.status.set(PollerState::Polling);
            let poll = self.poll_bounded();
            tokio::pin!(poll);

            // Keep reaping finished units while the long poll is pending.
            let polled = loop {
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut shutdown) => break 'run Ok(()),
                    Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                        if let Err(e) = self.settle(joined) {
                            break 'run Err(e);
                        }
                    }
                    polled = &mut poll => break polled,
                }
            };

            match polled {
                Ok(Some(unit)) => {
                    let source = Arc::clone(&self.source);
                    let status = self.status.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        let result = source.process(unit, &status).await;
                        status.set(PollerState::Idle);
                        result
                    });
                }
                Ok(None) => {
                    self.status.set(PollerState::Idle);
                    if self.config.consume_mode == ConsumeMode::FailFast {
                        break 'run Err(Error::NoUnitAvailable(self.source.kind()));
                    }
                    debug!(identity = %self.source.identity(), "Nothing to poll");
                }
                Err(e) => {
                    self.status.set(PollerState::Idle);
                    if self.config.consume_mode == ConsumeMode::FailFast {
                        break 'run Err(e);
                    }
                    warn!(
                        identity = %self.source.identity(),
                        error = %e,
                        backoff_ms = millis(self.config.poll_error_backoff),
                        "Poll failed"
                    );
                    drop(permit);
                    tokio::select! {
                        _ = stop_requested(&mut shutdown) => break 'run Ok(()),
                        _ = tokio::time::sleep(self.config.poll_error_backoff) => {}
                    }
                }
            }
        };

        self.drain(&mut in_flight).await;
        self.status.set(PollerState::Stopped);

        match &result {
            Ok(()) => info!(identity = %self.source.identity(), "Poller stopped"),
            Err(e) => error!(identity = %self.source.identity(), error = %e, "Poller stopped on error"),
        }
        result
    }

    /// Run on a spawned task, controlled through the returned handle.
    pub fn spawn(self) -> PollerHandle {
        let (stop, stop_rx) = watch::channel(false);
        let kind = self.source.kind();
        let state = self.status.subscribe();
        let join = tokio::spawn(self.run(stop_rx));

        PollerHandle {
            kind,
            stop,
            state,
            join,
        }
    }

    async fn poll_bounded(&self) -> Result<Option<S::Unit>> {
        match self.config.poll_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.source.poll()).await {
                Ok(polled) => polled,
                Err(_) => Ok(None),
            },
            None => self.source.poll().await,
        }
    }

    /// Judge the result of one finished unit. `Err` stops the poller.
    fn settle(&self, joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(Error::UnitPanicked {
                kind: self.source.kind(),
                message: panic_message(e.into_panic()),
            }),
            Err(_) => return Ok(()),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if self.source.is_fatal(&e) => Err(e),
            Err(e) => {
                warn!(
                    identity = %self.source.identity(),
                    kind = self.source.kind(),
                    error = %e,
                    "Unit failed"
                );
                Ok(())
            }
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<Result<()>>) {
        if in_flight.is_empty() {
            return;
        }

        let timeout = self.config.shutdown_timeout;
        let finish = async {
            while let Some(joined) = in_flight.join_next().await {
                if let Err(e) = self.settle(joined) {
                    error!(identity = %self.source.identity(), error = %e, "Unit failed while stopping");
                }
            }
        };

        if tokio::time::timeout(timeout, finish).await.is_err() {
            warn!(
                identity = %self.source.identity(),
                in_flight = in_flight.len(),
                timeout_secs = timeout.as_secs(),
                "Shutdown timeout exceeded, aborting in-flight units"
            );
            in_flight.abort_all();
        }
    }
}

/// Controls a spawned [`Poller`].
///
/// Dropping the handle stops the poller.
#[derive(Debug)]
pub struct PollerHandle {
    kind: &'static str,
    stop: watch::Sender<bool>,
    state: watch::Receiver<PollerState>,
    join: JoinHandle<Result<()>>,
}

impl PollerHandle {
    /// Ask the poller to stop. Calling this more than once is harmless.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// A receiver notified of every state change.
    pub fn subscribe(&self) -> watch::Receiver<PollerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the poller to end and return how it ended.
    pub async fn join(self) -> Result<()> {
        match self.join.await {
            Ok(result) => result,
            Err(e) => Err(Error::UnitPanicked {
                kind: self.kind,
                message: if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    e.to_string()
                },
            }),
        }
    }
}

/// Resolves once a stop is requested or nobody can request one anymore.
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
