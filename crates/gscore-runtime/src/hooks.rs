//! Concurrent hook execution.
//!
//! Hooks run together on a [`JoinSet`]. A failing or panicking hook is logged
//! on its own and never affects the others or the caller.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Hook fired when a bot connects; receives the bot id.
pub type ConnectHook = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Hook fired on core start or shutdown.
pub type LifecycleHook = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

pub(crate) fn connect_hook<F, Fut>(f: F) -> ConnectHook
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |bot_id| Box::pin(f(bot_id)))
}

pub(crate) fn lifecycle_hook<F, Fut>(f: F) -> LifecycleHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Runs every future to completion and returns how many failed.
pub(crate) async fn run_all(
    stage: &'static str,
    hooks: Vec<BoxFuture<'static, anyhow::Result<()>>>,
) -> usize {
    if hooks.is_empty() {
        return 0;
    }

    let mut set = JoinSet::new();
    for (index, hook) in hooks.into_iter().enumerate() {
        set.spawn(async move { (index, hook.await) });
    }

    let mut failures = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(()))) => debug!(stage, hook = index, "Hook finished"),
            Ok((index, Err(e))) => {
                failures += 1;
                error!(stage, hook = index, error = %e, "Hook failed");
            }
            Err(e) => {
                failures += 1;
                error!(stage, error = %e, "Hook panicked");
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    async fn fails() -> anyhow::Result<()> {
        anyhow::bail!("boom")
    }

    async fn panics() -> anyhow::Result<()> {
        panic!("hook panic")
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ok = {
            let ran = ran.clone();
            lifecycle_hook(move || {
                let ran = ran.clone();
                async move {
                    ran.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(())
                }
            })
        };
        let failing = lifecycle_hook(fails);
        let panicking = lifecycle_hook(panics);

        let failures = run_all("test", vec![ok(), failing(), panicking(), ok()]).await;
        assert_eq!(failures, 2);
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connect_hooks_receive_bot_id() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let hook = {
            let seen = seen.clone();
            connect_hook(move |bot_id| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(bot_id);
                    anyhow::Ok(())
                }
            })
        };
        assert_eq!(run_all("connect", vec![hook("nb2".into())]).await, 0);
        assert_eq!(*seen.lock(), vec!["nb2".to_string()]);
    }
}
