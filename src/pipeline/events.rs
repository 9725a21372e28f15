// src/pipeline/events.rs - Lifecycle event bus for extensions

use anyhow::Result;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{debug, error};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::context::ModerationContext;
use crate::error::{panic_message, ModerationFault};
use crate::types::{ChatEvent, ModerationOutput};

/// Emitted before the handler runs.
pub const CHAT_RECEIVED: &str = "chat_received";
/// Emitted after the handler produced its output.
pub const CHAT_PROCESSED: &str = "chat_processed";

/// Payload delivered to listeners. Listeners observe; they cannot change the outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    ChatReceived {
        event: ChatEvent,
    },
    ChatProcessed {
        event: ChatEvent,
        output: ModerationOutput,
        is_bad: bool,
    },
}

impl BusEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BusEvent::ChatReceived { .. } => CHAT_RECEIVED,
            BusEvent::ChatProcessed { .. } => CHAT_PROCESSED,
        }
    }

    pub fn chat(&self) -> &ChatEvent {
        match self {
            BusEvent::ChatReceived { event } | BusEvent::ChatProcessed { event, .. } => event,
        }
    }
}

pub type BlockingFn = Box<dyn Fn(&BusEvent, &ModerationContext) -> Result<()> + Send + Sync>;
pub type SuspendingFn = Box<dyn Fn(BusEvent, Arc<ModerationContext>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// How a listener runs. Either way it completes before the next listener starts.
pub enum ListenerKind {
    /// Runs inline on the emitting task.
    Blocking(BlockingFn),
    /// Returns a future that the bus awaits to completion.
    Suspending(SuspendingFn),
}

pub struct Listener {
    pub name: String,
    pub kind: ListenerKind,
}

impl Listener {
    pub fn blocking<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&BusEvent, &ModerationContext) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: ListenerKind::Blocking(Box::new(f)),
        }
    }

    pub fn suspending<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(BusEvent, Arc<ModerationContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: ListenerKind::Suspending(Box::new(move |event, ctx| f(event, ctx).boxed())),
        }
    }

    async fn invoke(&self, event: &BusEvent, ctx: &Arc<ModerationContext>) -> Result<(), String> {
        let outcome = match &self.kind {
            ListenerKind::Blocking(f) => catch_unwind(AssertUnwindSafe(|| f(event, ctx.as_ref()))),
            ListenerKind::Suspending(f) => match catch_unwind(AssertUnwindSafe(|| f(event.clone(), Arc::clone(ctx)))) {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(payload) => Err(payload),
            },
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(payload) => Err(panic_message(payload.as_ref())),
        }
    }
}

/// Ordered listener lists keyed by event name.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Arc<Listener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the list for `event_name`.
    pub async fn on(&self, event_name: &str, listener: Listener) {
        debug!("New listener '{}' on '{}'", listener.name, event_name);
        self.listeners
            .write()
            .await
            .entry(event_name.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Run every listener registered for this event, one after another.
    ///
    /// Listeners registered while an emit is in progress are picked up by the
    /// next emit. A failing listener is logged and the rest still run.
    pub async fn emit(&self, event: &BusEvent, ctx: &Arc<ModerationContext>) {
        let event_name = event.name();
        let snapshot: Vec<Arc<Listener>> = match self.listeners.read().await.get(event_name) {
            Some(list) => list.clone(),
            None => return,
        };

        for listener in snapshot {
            match listener.invoke(event, ctx).await {
                Ok(()) => debug!("Emitted '{}' to '{}'", event_name, listener.name),
                Err(reason) => {
                    let fault = ModerationFault::listener(listener.name.as_str(), event_name, reason);
                    error!("{}", fault);
                }
            }
        }
    }

    pub async fn listener_count(&self, event_name: &str) -> usize {
        self.listeners
            .read()
            .await
            .get(event_name)
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::testing::*;
    use crate::types::{ModerationInput, Player};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn received() -> BusEvent {
        BusEvent::ChatReceived {
            event: ChatEvent::public(ModerationInput::new(Player::new("alex"), "hello")),
        }
    }

    fn ctx() -> Arc<ModerationContext> {
        Arc::new(test_context(RecordingNotifier::default()))
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_listener_does_not_stop_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.on(CHAT_RECEIVED, Listener::blocking("fails", |_, _| anyhow::bail!("nope")))
            .await;
        bus.on(CHAT_RECEIVED, Listener::blocking("panics", |_, _| panic!("kaboom")))
            .await;
        bus.on(
            CHAT_RECEIVED,
            Listener::suspending("async-fails", |_, _| async { Err::<(), _>(anyhow::anyhow!("later")) }),
        )
        .await;
        let counter = Arc::clone(&hits);
        bus.on(
            CHAT_RECEIVED,
            Listener::blocking("counts", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await;

        bus.emit(&received(), &ctx()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listeners_run_in_order_to_completion() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&log);
        bus.on(
            CHAT_RECEIVED,
            Listener::suspending("slow", move |_, _| {
                let log = Arc::clone(&first);
                async move {
                    tokio::task::yield_now().await;
                    log.lock().unwrap().push("slow");
                    Ok::<(), anyhow::Error>(())
                }
            }),
        )
        .await;
        let second = Arc::clone(&log);
        bus.on(
            CHAT_RECEIVED,
            Listener::blocking("fast", move |_, _| {
                second.lock().unwrap().push("fast");
                Ok(())
            }),
        )
        .await;

        bus.emit(&received(), &ctx()).await;
        assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[tokio::test]
    async fn test_emit_only_reaches_matching_event() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on(
            CHAT_PROCESSED,
            Listener::blocking("processed", move |event, _| {
                assert_eq!(event.name(), CHAT_PROCESSED);
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await;

        bus.emit(&received(), &ctx()).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count(CHAT_PROCESSED).await, 1);
        assert_eq!(bus.listener_count(CHAT_RECEIVED).await, 0);
    }
}
