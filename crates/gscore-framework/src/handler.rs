//! Handler system for the gscore framework.
//!
//! A handler is any async function taking the reply handle ([`Bot`]) and the
//! match-annotated [`Event`], returning `anyhow::Result<()>`:
//!
//! ```rust,ignore
//! async fn help(bot: Bot, event: Event) -> anyhow::Result<()> {
//!     bot.send(format!("hello {}", event.user_id)).await?;
//!     Ok(())
//! }
//!
//! sv.on_fullmatch("help").handler(help)?;
//! ```
//!
//! Errors and panics are caught by the dispatcher and logged with the
//! service module, trigger and session the invocation belonged to.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use gscore_core::Event;

use crate::bot::Bot;

/// What a handler invocation resolves to.
pub type HandlerResult = anyhow::Result<()>;

// ============================================================================
// Handler Trait
// ============================================================================

/// A type-erased trigger handler.
///
/// Implemented automatically for `Fn(Bot, Event) -> impl Future<Output =
/// anyhow::Result<()>>` closures and async functions.
pub trait Handler: Send + Sync + 'static {
    /// Runs the handler for one matched event.
    fn call(&self, bot: Bot, event: Event) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Bot, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, bot: Bot, event: Event) -> BoxFuture<'static, HandlerResult> {
        (self)(bot, event).boxed()
    }
}

/// Shared handler stored in a trigger.
pub type BoxedHandler = Arc<dyn Handler>;

/// Boxes a handler for storage.
pub fn into_handler<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::bot::tests::test_bot;

    #[tokio::test]
    async fn closures_are_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = into_handler(move |_bot: Bot, event: Event| {
            let counter = counter.clone();
            async move {
                assert_eq!(event.text, "ping");
                counter.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(())
            }
        });

        let event = Event {
            text: "ping".into(),
            ..Default::default()
        };
        handler.call(test_bot(), event).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_fns_are_handlers() {
        async fn failing(_bot: Bot, _event: Event) -> HandlerResult {
            anyhow::bail!("boom")
        }

        let handler = into_handler(failing);
        let err = handler
            .call(test_bot(), Event::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
