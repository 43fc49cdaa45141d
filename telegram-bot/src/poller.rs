//! Long-poll receiver: fetches updates, dispatches each one to the handler registry in update-id
//! order, and advances the cursor so no update is dispatched twice.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use dbot_core::{HandlerError, Transport, TransportError, Update};
use dbot_telegram::Settings;
use handler_registry::HandlerRegistry;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::signal::StopSignal;

/// Handler failures kept for [`PollerState::take_handler_errors`]; older ones are dropped.
const MAX_HANDLER_ERRORS: usize = 64;

thread_local! {
    static ON_DISPATCH_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is running message handlers.
pub fn on_dispatch_thread() -> bool {
    ON_DISPATCH_THREAD.with(Cell::get)
}

/// State that outlives a single poller run: the update cursor and recorded faults.
#[derive(Debug, Default)]
pub struct PollerState {
    next_offset: Mutex<Option<i64>>,
    last_poll_error: Mutex<Option<TransportError>>,
    handler_errors: Mutex<VecDeque<HandlerError>>,
}

impl PollerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset for the next `get_updates` call: last dispatched update id + 1.
    pub fn next_offset(&self) -> Option<i64> {
        *self
            .next_offset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, update_id: i64) {
        *self
            .next_offset
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(update_id + 1);
    }

    /// Terminal error that ended the most recent poller run, if any.
    pub fn last_poll_error(&self) -> Option<TransportError> {
        self.last_poll_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_poll_error(&self, error: Option<TransportError>) {
        *self
            .last_poll_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    fn record_handler_errors(&self, errors: Vec<HandlerError>) {
        let mut log = self
            .handler_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for e in errors {
            if log.len() == MAX_HANDLER_ERRORS {
                log.pop_front();
            }
            log.push_back(e);
        }
    }

    /// Drains recorded handler failures, oldest first.
    pub fn take_handler_errors(&self) -> Vec<HandlerError> {
        self.handler_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }
}

/// A running poll loop.
pub struct InboundPoller {
    stop: StopSignal,
    task: Option<JoinHandle<()>>,
}

impl InboundPoller {
    /// Spawns the poll loop on `runtime`, resuming from `state`'s cursor. When `previous` is a
    /// stopped loop that has not exited yet, polling begins only after it has.
    pub fn start(
        transport: Arc<dyn Transport>,
        registry: Arc<HandlerRegistry>,
        settings: Settings,
        state: Arc<PollerState>,
        previous: Option<JoinHandle<()>>,
        runtime: &Handle,
    ) -> Self {
        let stop = StopSignal::new();
        state.set_poll_error(None);
        let task = runtime.spawn(run_poller(
            transport,
            registry,
            settings,
            state,
            previous,
            stop.clone(),
        ));
        Self {
            stop,
            task: Some(task),
        }
    }

    /// False once the loop has exited (stopped, or ended by a terminal error).
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the loop to stop and hands back its task. The loop exits after the handler that
    /// is currently running, if any, returns.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        self.stop.stop();
        self.task.take()
    }
}

impl Drop for InboundPoller {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

async fn run_poller(
    transport: Arc<dyn Transport>,
    registry: Arc<HandlerRegistry>,
    settings: Settings,
    state: Arc<PollerState>,
    previous: Option<JoinHandle<()>>,
    stop: StopSignal,
) {
    // Awaited even when stopped early, so this task never exits before the one it replaces.
    if let Some(previous) = previous {
        debug!("step: waiting for the previous poller to exit");
        let _ = previous.await;
        if stop.is_stopped() {
            return;
        }
    }
    info!("Started receiving messages");

    'poll: loop {
        let offset = state.next_offset();
        let batch = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            batch = transport.get_updates(offset, settings.poll_timeout()) => batch,
        };

        match batch {
            Ok(mut updates) => {
                updates.sort_by_key(|u| u.update_id);
                for update in updates {
                    if stop.is_stopped() {
                        break 'poll;
                    }
                    if state.next_offset().is_some_and(|next| update.update_id < next) {
                        debug!(update_id = update.update_id, "step: skipping already dispatched update");
                        continue;
                    }
                    let update_id = update.update_id;
                    dispatch(&registry, &settings, &state, update).await;
                    state.advance(update_id);
                }
            }
            Err(e) if e.is_transient() => {
                let delay = e.backoff(settings.retry_delay());
                warn!(error = %e, retry_in_ms = delay.as_millis() as u64, "Polling failed; retrying");
                if !stop.sleep(delay).await {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "Polling failed permanently; no longer receiving messages");
                state.set_poll_error(Some(e));
                break;
            }
        }
    }

    info!("Stopped receiving messages");
}

/// Runs the handlers for one update on a blocking thread, so handlers may call the synchronous
/// facade API.
async fn dispatch(
    registry: &Arc<HandlerRegistry>,
    settings: &Settings,
    state: &PollerState,
    update: Update,
) {
    let sender = update.message.as_ref().and_then(|m| m.sender_id());
    if !settings.is_user_allowed(sender) {
        debug!(update_id = update.update_id, user_id = ?sender, "step: sender not allowed, update dropped");
        return;
    }

    let registry = registry.clone();
    let update_id = update.update_id;
    let outcome = tokio::task::spawn_blocking(move || {
        ON_DISPATCH_THREAD.with(|flag| flag.set(true));
        let report = registry.dispatch(&update);
        ON_DISPATCH_THREAD.with(|flag| flag.set(false));
        report
    })
    .await;

    match outcome {
        Ok(report) => {
            debug!(update_id, invoked = report.invoked, failed = report.failures.len(), "step: update dispatched");
            if !report.is_clean() {
                state.record_handler_errors(report.failures);
            }
        }
        Err(e) => error!(update_id, error = %e, "Dispatch task failed"),
    }
}
