//! Message handler concept: a synchronous callback invoked once per inbound update.

use std::sync::Arc;

use crate::types::Update;

/// Callback for inbound updates. Runs on the poller's dispatch thread; returning `Err` (or
/// panicking) marks this handler as failed for this update without affecting other handlers.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, update: &Update) -> anyhow::Result<()>;

    /// Name used in logs and [`crate::HandlerError`].
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<F> MessageHandler for F
where
    F: Fn(&Update) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, update: &Update) -> anyhow::Result<()> {
        self(update)
    }
}

/// Wraps a closure as a shareable handler. Keep the returned `Arc` to remove the handler later;
/// registries compare handlers by pointer identity.
pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&Update) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Pointer identity of two shared handlers (data pointer only, vtables may differ across
/// codegen units).
pub fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named;

    impl MessageHandler for Named {
        fn handle(&self, _update: &Update) -> anyhow::Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "named"
        }
    }

    fn update() -> Update {
        Update {
            update_id: 1,
            message: None,
        }
    }

    #[test]
    fn test_closure_is_a_handler() {
        let h = handler_fn(|u| {
            anyhow::ensure!(u.update_id == 1, "unexpected update");
            Ok(())
        });
        assert!(h.handle(&update()).is_ok());
    }

    #[test]
    fn test_same_handler_is_identity_based() {
        let a = handler_fn(|_| Ok(()));
        let b = handler_fn(|_| Ok(()));
        let a2 = Arc::clone(&a);
        assert!(same_handler(&a, &a2));
        assert!(!same_handler(&a, &b));
    }

    #[test]
    fn test_name_override() {
        let h: Arc<dyn MessageHandler> = Arc::new(Named);
        assert_eq!(h.name(), "named");
    }
}
