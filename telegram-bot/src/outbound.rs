//! FIFO outbound queue drained by a single send worker.
//!
//! Requests are sent one at a time in submission order. Transient failures (network, rate limit)
//! are retried after `retry_delay` (or the server's hint, when longer) until they succeed or the
//! queue is stopped; terminal failures complete the request with an error and the worker moves on.
//! After each successful send the worker waits `send_delay` before taking the next request.

use std::sync::Arc;

use dbot_core::{DbotError, MessageId, OutboundRequest, Result, Transport};
use dbot_telegram::Settings;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::poller::on_dispatch_thread;
use crate::signal::StopSignal;

struct Job {
    request: OutboundRequest,
    reply: oneshot::Sender<Result<MessageId>>,
}

/// Completion handle for one queued request.
#[derive(Debug)]
pub struct Delivery {
    rx: oneshot::Receiver<Result<MessageId>>,
}

impl Delivery {
    /// Blocks the calling thread until the request is sent, fails terminally or is discarded.
    ///
    /// Inside a tokio runtime (other than a message handler) this returns `BlockingInRuntime`
    /// without waiting; use [`Delivery::outcome`] there.
    pub fn wait(self) -> Result<MessageId> {
        if !on_dispatch_thread() && Handle::try_current().is_ok() {
            return Err(DbotError::BlockingInRuntime);
        }
        self.rx.blocking_recv().unwrap_or(Err(DbotError::Cancelled))
    }

    /// Async counterpart of [`Delivery::wait`].
    pub async fn outcome(self) -> Result<MessageId> {
        self.rx.await.unwrap_or(Err(DbotError::Cancelled))
    }
}

/// Sender side of the queue plus the worker task draining it.
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Job>,
    stop: StopSignal,
    worker: Option<JoinHandle<()>>,
}

impl OutboundQueue {
    /// Spawns the send worker on `runtime`.
    pub fn start(transport: Arc<dyn Transport>, settings: Settings, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = StopSignal::new();
        let worker = runtime.spawn(run_worker(transport, settings, rx, stop.clone()));
        Self {
            tx,
            stop,
            worker: Some(worker),
        }
    }

    /// Appends a request to the queue. Fails with `Cancelled` once the queue is stopped.
    pub fn enqueue(&self, request: OutboundRequest) -> Result<Delivery> {
        if self.stop.is_stopped() {
            return Err(DbotError::Cancelled);
        }
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job { request, reply })
            .map_err(|_| DbotError::Cancelled)?;
        Ok(Delivery { rx })
    }

    /// Signals the worker to stop and hands back its task so the caller can wait for it. The
    /// in-flight request and everything still queued complete with `Cancelled`.
    pub fn stop(&mut self) -> Option<JoinHandle<()>> {
        self.stop.stop();
        self.worker.take()
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

async fn run_worker(
    transport: Arc<dyn Transport>,
    settings: Settings,
    mut rx: mpsc::UnboundedReceiver<Job>,
    stop: StopSignal,
) {
    info!("Outbound worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = stop.stopped() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        match deliver(transport.as_ref(), &settings, &job.request, &stop).await {
            Some(outcome) => {
                let sent = outcome.is_ok();
                let _ = job.reply.send(outcome);
                if sent && !stop.sleep(settings.send_delay()).await {
                    break;
                }
            }
            None => {
                let _ = job.reply.send(Err(DbotError::Cancelled));
                break;
            }
        }
    }

    rx.close();
    let mut discarded = 0usize;
    while let Ok(job) = rx.try_recv() {
        let _ = job.reply.send(Err(DbotError::Cancelled));
        discarded += 1;
    }
    if discarded > 0 {
        warn!(discarded, "Outbound queue stopped; pending messages discarded");
    }
    info!("Outbound worker stopped");
}

/// Sends one request, retrying transient failures. `None` means the queue was stopped first.
#[instrument(skip_all, fields(target = ?request.target))]
async fn deliver(
    transport: &dyn Transport,
    settings: &Settings,
    request: &OutboundRequest,
    stop: &StopSignal,
) -> Option<Result<MessageId>> {
    let parse_mode = request.parse_mode.unwrap_or(settings.parse_mode());
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = stop.stopped() => return None,
            outcome = transport.send_message(&request.target, &request.text, parse_mode) => outcome,
        };

        match outcome {
            Ok(message_id) => {
                debug!(%message_id, attempt, "step: message sent");
                return Some(Ok(message_id));
            }
            Err(e) if e.is_transient() => {
                let delay = e.backoff(settings.retry_delay());
                warn!(error = %e, attempt, retry_in_ms = delay.as_millis() as u64, "Send failed; retrying");
                if !stop.sleep(delay).await {
                    return None;
                }
            }
            Err(e) => {
                error!(error = %e, attempt, "Send failed; giving up on message");
                return Some(Err(e.into()));
            }
        }
    }
}
