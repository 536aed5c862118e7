//! Event dispatcher for the gscore framework.
//!
//! The [`Dispatcher`] takes one decoded [`Event`] and decides which handlers
//! run:
//!
//! 1. A handler waiting on this conversation (see
//!    [`Bot::receive_resp`](crate::Bot::receive_resp)) takes the event and
//!    dispatch stops.
//! 2. Candidate service modules are those that [admit](ServiceModule::admits)
//!    the event, ordered by descending module priority, then registration
//!    order. Plugin priority does not take part in the ordering.
//! 3. Within a module, triggers are checked by type precedence and then in
//!    registration order.
//! 4. Every match is admitted through the [`SessionGuard`] and spawned on its
//!    own task. A blocking match stops all further evaluation.
//!
//! Dispatch itself never awaits a handler, so a slow handler cannot stall
//! the connection that delivered the event.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(registry, outbound);
//! let outcome = dispatcher.dispatch(event);
//! if !outcome.matched() {
//!     // dropped silently
//! }
//! ```

use std::cmp::Reverse;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::{Ready, ready};
use gscore_core::{DecodeResult, Event, MessageReceive};
use tokio::task::JoinHandle;
use tower::Service;
use tracing::{Instrument, debug, debug_span, error, trace};

use crate::bot::{Bot, BoxedOutbound};
use crate::error::HandlerError;
use crate::registry::SvRegistry;
use crate::service::ServiceModule;
use crate::session::SessionGuard;
use crate::trigger::TriggerType;

/// A trigger that fired for an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTrigger {
    pub sv: String,
    pub kind: TriggerType,
    pub key: String,
    pub block: bool,
}

/// What happened to one dispatched event.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Triggers that fired, in evaluation order.
    pub fired: Vec<FiredTrigger>,
    /// Whether a blocking trigger stopped evaluation.
    pub blocked: bool,
    /// Whether a waiting handler took the event.
    pub consumed: bool,
    handles: Vec<JoinHandle<()>>,
}

impl DispatchOutcome {
    /// Returns `true` if any handler received the event.
    pub fn matched(&self) -> bool {
        self.consumed || !self.fired.is_empty()
    }

    /// Waits for every spawned invocation to finish.
    pub async fn join(self) -> Vec<FiredTrigger> {
        for handle in self.handles {
            let _ = handle.await;
        }
        self.fired
    }
}

/// Routes events to matching triggers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SvRegistry>,
    sessions: SessionGuard,
    outbound: BoxedOutbound,
}

impl Dispatcher {
    pub fn new(registry: Arc<SvRegistry>, outbound: BoxedOutbound) -> Self {
        Self {
            registry,
            sessions: SessionGuard::new(),
            outbound,
        }
    }

    pub fn registry(&self) -> &Arc<SvRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionGuard {
        &self.sessions
    }

    /// Service modules that may handle `event`, in evaluation order.
    pub fn candidates(&self, event: &Event) -> Vec<Arc<ServiceModule>> {
        let mut svs: Vec<_> = self
            .registry
            .services()
            .into_iter()
            .filter(|sv| sv.admits(event))
            .collect();
        svs.sort_by_key(|sv| (Reverse(sv.priority()), sv.index()));
        svs
    }

    /// Decodes one frame received on connection `ws_id` and dispatches it.
    pub fn dispatch_frame(&self, ws_id: &str, data: &[u8]) -> DecodeResult<DispatchOutcome> {
        let mut event = Event::from(MessageReceive::decode(data)?);
        event.ws_id = ws_id.to_string();
        Ok(self.dispatch(event))
    }

    /// Dispatches one event. Must be called from within a Tokio runtime.
    pub fn dispatch(&self, event: Event) -> DispatchOutcome {
        let span = debug_span!(
            "dispatch",
            bot_id = %event.bot_id,
            session = %event.session_id(),
        );
        let _enter = span.enter();
        let mut outcome = DispatchOutcome::default();

        let Some(event) = self.sessions.offer(event) else {
            debug!("Event taken by a waiting handler");
            outcome.consumed = true;
            return outcome;
        };

        'svs: for sv in self.candidates(&event) {
            for trigger in sv.triggers() {
                let Some(found) = trigger.check(&event) else {
                    continue;
                };

                let mut annotated = event.clone();
                found.apply(&mut annotated);
                let handle = self.spawn(
                    &sv,
                    trigger.kind(),
                    trigger.key(),
                    trigger.handler().clone(),
                    annotated,
                );
                outcome.handles.push(handle);
                outcome.fired.push(FiredTrigger {
                    sv: sv.name().to_string(),
                    kind: trigger.kind(),
                    key: trigger.key().to_string(),
                    block: trigger.is_blocking(),
                });

                if trigger.is_blocking() {
                    debug!(
                        sv = %sv.name(),
                        key = %trigger.key(),
                        "Blocking trigger matched, stopping dispatch"
                    );
                    outcome.blocked = true;
                    break 'svs;
                }
            }
        }

        if outcome.fired.is_empty() {
            trace!(text = %event.raw_text, "No trigger matched");
        }
        outcome
    }

    fn spawn(
        &self,
        sv: &ServiceModule,
        kind: TriggerType,
        key: &str,
        handler: crate::handler::BoxedHandler,
        event: Event,
    ) -> JoinHandle<()> {
        let session_id = event.session_id();
        let permit = self
            .sessions
            .admit(&session_id, Some(&event.multiply_key()));
        let bot = Bot::new(self.outbound.clone(), self.sessions.clone(), &event);

        let span = debug_span!(
            "handler",
            bot_id = %event.bot_id,
            sv = %sv.name(),
            trigger = %kind,
            key = %key,
            session = %session_id,
        );
        debug!(sv = %sv.name(), trigger = %kind, key = %key, "Trigger matched");

        tokio::spawn(
            async move {
                let _permit = permit;
                let result = AssertUnwindSafe(async move { handler.call(bot, event).await })
                    .catch_unwind()
                    .await;
                let failure = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(HandlerError::Failed(e)),
                    Err(panic) => Some(HandlerError::from_panic(panic)),
                };
                if let Some(err) = failure {
                    error!(error = %err, "Handler failed");
                }
            }
            .instrument(span),
        )
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tower Service Implementation for Dispatcher
// ============================================================================

/// Lets middleware wrap dispatch; the returned outcome is already spawned.
impl Service<Event> for Dispatcher {
    type Response = DispatchOutcome;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: Event) -> Self::Future {
        ready(Ok(self.dispatch(event)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use gscore_core::{Scope, Segment, UserType};
    use parking_lot::Mutex;
    use tower::ServiceExt;

    use super::*;
    use crate::bot::tests::RecordingOutbound;
    use crate::handler::{Handler, HandlerResult};
    use crate::plugin::PluginOptions;
    use crate::service::SvOptions;

    fn setup() -> (Arc<SvRegistry>, Arc<RecordingOutbound>, Dispatcher) {
        let registry = Arc::new(SvRegistry::in_memory());
        let outbound = Arc::new(RecordingOutbound::default());
        let dispatcher = Dispatcher::new(registry.clone(), outbound.clone());
        (registry, outbound, dispatcher)
    }

    fn group_text(text: &str) -> Event {
        Event::from(MessageReceive {
            bot_id: "onebot".into(),
            bot_self_id: "10000".into(),
            user_type: UserType::Group,
            group_id: Some("8888".into()),
            user_id: "42".into(),
            content: vec![Segment::text(text)],
            ..Default::default()
        })
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl Handler {
        let log = log.clone();
        let tag = tag.to_string();
        move |_bot: Bot, event: Event| {
            let log = log.clone();
            let tag = tag.clone();
            async move {
                log.lock().push(format!("{tag}:{}", event.text));
                HandlerResult::Ok(())
            }
        }
    }

    fn names(fired: &[FiredTrigger]) -> Vec<&str> {
        fired.iter().map(|f| f.sv.as_str()).collect()
    }

    #[tokio::test]
    async fn blocking_higher_priority_suppresses_lower() {
        let (registry, _, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        let a = registry.sv("a", &plugin, SvOptions::new().priority(8)).unwrap();
        let b = registry.sv("b", &plugin, SvOptions::new().priority(3)).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        // Register the lower-priority module's trigger first.
        b.on_keyword("hi").handler(recording(&log, "b")).unwrap();
        a.on_keyword("hi").block(true).handler(recording(&log, "a")).unwrap();

        let outcome = dispatcher.dispatch(group_text("hi there"));
        assert!(outcome.blocked);
        let fired = outcome.join().await;
        assert_eq!(names(&fired), vec!["a"]);
        assert_eq!(*log.lock(), vec!["a:hi there"]);
    }

    #[tokio::test]
    async fn non_blocking_modules_all_fire_in_order() {
        let (registry, _, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        let low = registry.sv("low", &plugin, SvOptions::new().priority(1)).unwrap();
        let first = registry.sv("first", &plugin, SvOptions::new()).unwrap();
        let second = registry.sv("second", &plugin, SvOptions::new()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for sv in [&low, &first, &second] {
            sv.on_prefix("go").handler(recording(&log, sv.name())).unwrap();
        }

        let fired = dispatcher.dispatch(group_text("go home")).join().await;
        assert_eq!(names(&fired), vec!["first", "second", "low"]);
        assert_eq!(log.lock().len(), 3);
    }

    #[tokio::test]
    async fn equal_priority_keeps_registration_order() {
        let (registry, _, dispatcher) = setup();
        let low = registry.plugin("low", PluginOptions::new().priority(1)).unwrap();
        let high = registry.plugin("high", PluginOptions::new().priority(9)).unwrap();
        let first = registry.sv("first", &low, SvOptions::new()).unwrap();
        let second = registry.sv("second", &high, SvOptions::new()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        first.on_prefix("go").handler(recording(&log, "first")).unwrap();
        second.on_prefix("go").handler(recording(&log, "second")).unwrap();

        let fired = dispatcher.dispatch(group_text("go")).join().await;
        assert_eq!(names(&fired), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn type_precedence_within_module() {
        let (registry, _, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        let sv = registry.sv("sv", &plugin, SvOptions::new()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        sv.on_prefix("abc").block(true).handler(recording(&log, "prefix")).unwrap();
        sv.on_fullmatch("abc").block(true).handler(recording(&log, "full")).unwrap();

        let fired = dispatcher.dispatch(group_text("abc")).join().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, TriggerType::Fullmatch);

        let fired = dispatcher.dispatch(group_text("abcdef")).join().await;
        assert_eq!(fired[0].kind, TriggerType::Prefix);
        assert_eq!(*log.lock(), vec!["full:", "prefix:def"]);
    }

    #[tokio::test]
    async fn direct_module_never_sees_group_events() {
        let (registry, _, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        let sv = registry
            .sv("dm", &plugin, SvOptions::new().area(Scope::Direct))
            .unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        sv.on_message().handler(recording(&log, "dm")).unwrap();

        let outcome = dispatcher.dispatch(group_text("hello"));
        assert!(!outcome.matched());
        assert!(dispatcher.candidates(&group_text("hello")).is_empty());
    }

    #[tokio::test]
    async fn guard_released_after_handler_error() {
        let (registry, _, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        let sv = registry.sv("sv", &plugin, SvOptions::new()).unwrap();

        async fn failing(_bot: Bot, _event: Event) -> HandlerResult {
            anyhow::bail!("database unavailable")
        }
        async fn panicking(_bot: Bot, _event: Event) -> HandlerResult {
            panic!("unexpected state")
        }
        sv.on_fullmatch("fail").handler(failing).unwrap();
        sv.on_fullmatch("panic").handler(panicking).unwrap();

        let event = group_text("fail");
        let session = event.session_id();
        dispatcher.dispatch(event).join().await;
        assert!(!dispatcher.sessions().is_active(&session));

        dispatcher.dispatch(group_text("panic")).join().await;
        assert!(dispatcher.sessions().is_empty());
    }

    #[tokio::test]
    async fn waiter_consumes_follow_up() {
        let (registry, outbound, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        let sv = registry.sv("sv", &plugin, SvOptions::new()).unwrap();

        async fn guess(bot: Bot, _event: Event) -> HandlerResult {
            bot.send("pick a number").await?;
            let reply = bot.receive_resp(Duration::from_secs(5)).await?;
            bot.send(format!("you said {}", reply.raw_text)).await?;
            Ok(())
        }
        sv.on_fullmatch("guess").block(true).handler(guess).unwrap();

        let first = dispatcher.dispatch(group_text("guess"));
        let session = group_text("guess").session_id();

        // Retry until the handler has registered its waiter.
        let mut second = dispatcher.dispatch(group_text("7"));
        while !second.consumed {
            assert!(second.fired.is_empty());
            tokio::task::yield_now().await;
            second = dispatcher.dispatch(group_text("7"));
        }
        first.join().await;

        assert!(!dispatcher.sessions().is_active(&session));
        let sent = outbound.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1.plain_text(), "you said 7");
    }

    #[tokio::test]
    async fn dispatch_frame_decodes() {
        let (registry, _, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new().prefix("gs")).unwrap();
        let sv = registry.sv("sv", &plugin, SvOptions::new()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        sv.on_command("uid").handler(recording(&log, "uid")).unwrap();

        let frame = br#"{"bot_id":"onebot","user_id":"1","group_id":"2","content":[{"type":"text","data":"gsuid 100"}]}"#;
        dispatcher.dispatch_frame("nb2", frame).unwrap().join().await;
        assert_eq!(*log.lock(), vec!["uid:100"]);

        assert!(dispatcher.dispatch_frame("nb2", b"not json").is_err());
    }

    #[tokio::test]
    async fn usable_as_tower_service() {
        let (registry, _, dispatcher) = setup();
        let plugin = registry.plugin("p", PluginOptions::new()).unwrap();
        let sv = registry.sv("sv", &plugin, SvOptions::new()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        sv.on_suffix("?").handler(recording(&log, "q")).unwrap();

        let outcome = dispatcher.oneshot(group_text("why?")).await.unwrap();
        outcome.join().await;
        assert_eq!(*log.lock(), vec!["q:why"]);
    }
}
