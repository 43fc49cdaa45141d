//! # Handler registry
//!
//! Ordered, duplicate-free collection of [`MessageHandler`]s shared between the thread that
//! registers handlers and the poller that dispatches updates. Dispatch runs every handler in
//! registration order on the calling thread; a failing or panicking handler is reported as a
//! [`HandlerError`] and never stops the handlers after it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use dbot_core::{same_handler, HandlerError, MessageHandler, Update};
use tracing::{debug, error, instrument};

/// Outcome of dispatching one update.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Number of handlers invoked.
    pub invoked: usize,
    /// One entry per handler that failed, in invocation order.
    pub failures: Vec<HandlerError>,
}

impl DispatchReport {
    /// True when every invoked handler succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry of handlers; all operations are safe to call from any thread.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler. Returns false (and changes nothing) if the same handler is already
    /// registered.
    pub fn add(&self, handler: Arc<dyn MessageHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        if handlers.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn remove(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        match handlers.iter().position(|h| same_handler(h, handler)) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes all handlers.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn contains(&self, handler: &Arc<dyn MessageHandler>) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|h| same_handler(h, handler))
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the registered handlers, in registration order.
    pub fn handlers(&self) -> Vec<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invokes every handler with `update`, in registration order, on the calling thread.
    ///
    /// Works on a snapshot: handlers may add or remove handlers while running, the change takes
    /// effect from the next update.
    #[instrument(skip(self, update), fields(update_id = update.update_id))]
    pub fn dispatch(&self, update: &Update) -> DispatchReport {
        let snapshot = self.handlers();
        let mut report = DispatchReport::default();

        for handler in &snapshot {
            let name = handler.name().to_string();
            debug!(handler = %name, "step: handler processing");
            report.invoked += 1;

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(update)));
            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(HandlerError::Failed {
                    handler: name,
                    reason: format!("{:#}", e),
                }),
                Err(payload) => Some(HandlerError::Panicked {
                    handler: name,
                    reason: panic_reason(payload.as_ref()),
                }),
            };

            if let Some(failure) = failure {
                error!(error = %failure, "Handler failed; continuing with next handler");
                report.failures.push(failure);
            }
        }

        report
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// Integration tests live in tests/handler_registry_test.rs
