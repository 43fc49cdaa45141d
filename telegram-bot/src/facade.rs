//! Process-wide bot facade: lifecycle, handler registration, synchronous send API.
//!
//! One [`TelegramBot`] exists per process ([`TelegramBot::get_instance`]). It owns a small tokio
//! runtime on which the outbound worker and the poller run; the public API is synchronous and
//! callable from any plain thread, including from inside message handlers.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dbot_core::{
    handler_fn, DbotError, HandlerError, MessageHandler, MessageId, OutboundRequest, Result,
    Transport, TransportError, Update,
};
use dbot_telegram::{Settings, TelegramTransport};
use handler_registry::HandlerRegistry;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::outbound::{Delivery, OutboundQueue};
use crate::poller::{on_dispatch_thread, InboundPoller, PollerState};
use crate::text::join_url;

const WORKER_THREADS: usize = 2;
const WORKER_THREAD_NAME: &str = "telegram-bot-worker";

static INSTANCE: Mutex<Option<Arc<TelegramBot>>> = Mutex::new(None);

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotState {
    Uninitialized,
    /// Settings loaded and outbound worker running; not receiving.
    Initialized,
    ReceivingActive,
    /// Terminal; use [`TelegramBot::reset_instance`] to start over.
    Shutdown,
}

enum Lifecycle {
    Uninitialized,
    Running(Box<Running>),
    ShutDown,
}

struct Running {
    settings: Settings,
    runtime: Runtime,
    transport: Arc<dyn Transport>,
    outbound: OutboundQueue,
    poller: Option<InboundPoller>,
    /// Stopped poller still dispatching (stopped from a handler or an async context).
    draining: Option<JoinHandle<()>>,
}

/// The bot facade. Obtain it with [`TelegramBot::get_instance`].
pub struct TelegramBot {
    lifecycle: Mutex<Lifecycle>,
    registry: Arc<HandlerRegistry>,
    poller_state: Arc<PollerState>,
}

impl TelegramBot {
    fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            registry: Arc::new(HandlerRegistry::new()),
            poller_state: Arc::new(PollerState::new()),
        }
    }

    /// Returns the process-wide instance, creating it on first use.
    pub fn get_instance() -> Arc<TelegramBot> {
        INSTANCE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| Arc::new(TelegramBot::new()))
            .clone()
    }

    /// Shuts the current instance down and discards it; the next
    /// [`get_instance`](Self::get_instance) creates a fresh one.
    pub fn reset_instance() {
        let previous = INSTANCE
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(bot) = previous {
            bot.shutdown();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads settings (explicit, else environment and `env_path`/`.env`), connects the teloxide
    /// transport and starts the outbound worker. No-op when already initialized.
    #[instrument(skip(self, settings))]
    pub fn initialize(&self, settings: Option<Settings>, env_path: Option<&Path>) -> Result<()> {
        let mut lifecycle = self.lock();
        if !Self::may_initialize(&lifecycle)? {
            return Ok(());
        }
        let settings = match settings {
            Some(settings) => settings,
            None => Settings::from_env(env_path)?,
        };
        let transport: Arc<dyn Transport> = Arc::new(TelegramTransport::new(&settings)?);
        *lifecycle = Self::start(settings, transport)?;
        Ok(())
    }

    /// Like [`initialize`](Self::initialize) but with a caller-supplied transport.
    #[instrument(skip(self, settings, transport))]
    pub fn initialize_with_transport(
        &self,
        settings: Settings,
        transport: Arc<dyn Transport>,
    ) -> Result<()> {
        let mut lifecycle = self.lock();
        if !Self::may_initialize(&lifecycle)? {
            return Ok(());
        }
        *lifecycle = Self::start(settings, transport)?;
        Ok(())
    }

    fn may_initialize(lifecycle: &Lifecycle) -> Result<bool> {
        match lifecycle {
            Lifecycle::Uninitialized => Ok(true),
            Lifecycle::Running(_) => {
                debug!("TelegramBot already initialized");
                Ok(false)
            }
            Lifecycle::ShutDown => Err(DbotError::ShutDown),
        }
    }

    fn start(settings: Settings, transport: Arc<dyn Transport>) -> Result<Lifecycle> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()?;
        let outbound = OutboundQueue::start(transport.clone(), settings.clone(), runtime.handle());

        info!(
            channel_id = %settings.normalized_channel_id(),
            parse_mode = %settings.parse_mode(),
            poll_timeout_secs = settings.poll_timeout().as_secs(),
            "TelegramBot initialized"
        );

        Ok(Lifecycle::Running(Box::new(Running {
            settings,
            runtime,
            transport,
            outbound,
            poller: None,
            draining: None,
        })))
    }

    fn running(lifecycle: &mut Lifecycle) -> Result<&mut Running> {
        match lifecycle {
            Lifecycle::Running(running) => Ok(running),
            Lifecycle::Uninitialized | Lifecycle::ShutDown => Err(DbotError::NotInitialized),
        }
    }

    /// Registers a handler and starts receiving if not already.
    pub fn add_message_handler(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut lifecycle = self.lock();
        let running = Self::running(&mut lifecycle)?;
        if !self.registry.add(handler) {
            debug!("Handler already registered");
        }
        self.ensure_receiving(running);
        Ok(())
    }

    /// Registers a closure as a handler; keep the returned handle to remove it later.
    pub fn add_handler_fn<F>(&self, f: F) -> Result<Arc<dyn MessageHandler>>
    where
        F: Fn(&Update) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = handler_fn(f);
        self.add_message_handler(handler.clone())?;
        Ok(handler)
    }

    /// Unregisters a handler; false if it was not registered.
    pub fn remove_message_handler(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        self.registry.remove(handler)
    }

    pub fn clear_handlers(&self) {
        self.registry.clear();
    }

    /// Copy of the registered handlers, in registration order.
    pub fn handlers(&self) -> Vec<Arc<dyn MessageHandler>> {
        self.registry.handlers()
    }

    /// Starts the poller. Updates arriving while no handler is registered are acknowledged and
    /// dropped.
    pub fn start_receiving(&self) -> Result<()> {
        let mut lifecycle = self.lock();
        let running = Self::running(&mut lifecycle)?;
        if self.registry.is_empty() {
            warn!("No message handlers registered; received updates will be dropped");
        }
        self.ensure_receiving(running);
        Ok(())
    }

    fn ensure_receiving(&self, running: &mut Running) {
        if running.poller.as_ref().is_some_and(InboundPoller::is_running) {
            return;
        }
        let previous = running.draining.take().filter(|task| !task.is_finished());
        if previous.is_some() {
            debug!("step: previous poller still dispatching, new poller waits for it");
        }
        running.poller = Some(InboundPoller::start(
            running.transport.clone(),
            self.registry.clone(),
            running.settings.clone(),
            self.poller_state.clone(),
            previous,
            running.runtime.handle(),
        ));
    }

    /// Stops the poller; handlers stay registered. Waits for the poller to exit unless called
    /// from a message handler or an async context; a later [`start_receiving`](Self::start_receiving)
    /// then polls only once the stopped poller has exited.
    pub fn stop_receiving(&self) {
        let (task, handle) = {
            let mut lifecycle = self.lock();
            let Lifecycle::Running(running) = &mut *lifecycle else {
                return;
            };
            // A poller restarted while its predecessor drained exits only after it.
            let task = match running.poller.take() {
                Some(mut poller) => poller.stop(),
                None => running.draining.take(),
            };
            if task.is_some() && !can_join() {
                debug!("step: poller signalled, not waiting for exit");
                running.draining = task;
                return;
            }
            (task, running.runtime.handle().clone())
        };
        join_worker(&handle, task, "poller");
    }

    /// Queues `text` for the channel and returns immediately.
    pub fn send_message(&self, text: &str) -> Result<Delivery> {
        self.enqueue(OutboundRequest::to_channel(text))
    }

    /// Queues an arbitrary request and returns immediately.
    pub fn enqueue(&self, request: OutboundRequest) -> Result<Delivery> {
        let mut lifecycle = self.lock();
        Self::running(&mut lifecycle)?.outbound.enqueue(request)
    }

    /// Sends `text` to the channel and blocks until it is sent or fails terminally.
    pub fn send_message_sync(&self, text: &str) -> Result<MessageId> {
        self.send_message(text)?.wait()
    }

    /// Sends `text` to `chat_id` and blocks until it is sent or fails terminally.
    pub fn reply_to_user(&self, text: &str, chat_id: i64) -> Result<MessageId> {
        self.enqueue(OutboundRequest::to_chat(chat_id, text))?.wait()
    }

    /// Sends `base_url` joined with `path` to the channel and blocks until the outcome is known.
    pub fn send_url_sync(&self, path: &str) -> Result<MessageId> {
        let delivery = {
            let mut lifecycle = self.lock();
            let running = Self::running(&mut lifecycle)?;
            let url = join_url(running.settings.base_url(), path);
            running.outbound.enqueue(OutboundRequest::to_channel(url))?
        };
        delivery.wait()
    }

    /// Stops receiving and sending, discards unsent messages and releases the runtime.
    /// Idempotent; a never-initialized instance stays uninitialized.
    ///
    /// Both workers are signalled before either is waited for, so a handler blocked on a send
    /// gets `Cancelled` and the poller can exit. Called from a message handler or from inside a
    /// tokio runtime, the workers are only signalled: shutdown returns without waiting for them
    /// and they finish on the released runtime's background threads.
    pub fn shutdown(&self) {
        let running = {
            let mut lifecycle = self.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::ShutDown) {
                Lifecycle::Running(running) => running,
                other => {
                    *lifecycle = other;
                    return;
                }
            }
        };

        info!("Shutting down TelegramBot");
        let Running {
            runtime,
            mut outbound,
            poller,
            draining,
            ..
        } = *running;

        let poller_task = poller.and_then(|mut poller| poller.stop());
        let outbound_task = outbound.stop();
        join_worker(runtime.handle(), poller_task, "poller");
        join_worker(runtime.handle(), draining, "poller");
        join_worker(runtime.handle(), outbound_task, "outbound");
        drop(outbound);
        runtime.shutdown_background();
        info!("TelegramBot shut down");
    }

    pub fn state(&self) -> BotState {
        match &*self.lock() {
            Lifecycle::Uninitialized => BotState::Uninitialized,
            Lifecycle::ShutDown => BotState::Shutdown,
            Lifecycle::Running(running) => {
                if running.poller.as_ref().is_some_and(InboundPoller::is_running) {
                    BotState::ReceivingActive
                } else {
                    BotState::Initialized
                }
            }
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.state() == BotState::ReceivingActive
    }

    /// Active settings; `None` unless initialized.
    pub fn settings(&self) -> Option<Settings> {
        match &*self.lock() {
            Lifecycle::Running(running) => Some(running.settings.clone()),
            _ => None,
        }
    }

    /// Terminal error that stopped the poller, if it stopped on its own.
    pub fn last_poll_error(&self) -> Option<TransportError> {
        self.poller_state.last_poll_error()
    }

    /// Drains handler failures recorded since the last call, oldest first.
    pub fn take_handler_errors(&self) -> Vec<HandlerError> {
        self.poller_state.take_handler_errors()
    }
}

impl Drop for TelegramBot {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// False on a handler thread (the poller is waiting on it) and inside any tokio runtime (blocking
/// there would stall the caller's own runtime).
fn can_join() -> bool {
    !on_dispatch_thread() && Handle::try_current().is_err()
}

/// Waits for a signalled worker task to exit, when the calling thread may block.
fn join_worker(handle: &Handle, task: Option<JoinHandle<()>>, worker: &str) {
    let Some(task) = task else {
        return;
    };
    if !can_join() {
        debug!(worker, "step: worker signalled, not waiting for exit");
        return;
    }
    if let Err(e) = handle.block_on(task) {
        error!(worker, error = %e, "Worker task failed");
    }
}
