//! Observer registry with per-handler failure isolation.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_stream::try_stream;
use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::error::WsError;
use super::event::{Event, EventKind};
use crate::Result;

/// Broadcast channel capacity for the event stream.
const BROADCAST_CAPACITY: usize = 1024;

/// Callback invoked with every matching [`Event`].
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Identity of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Maps [`EventKind`]s to their registered handlers.
///
/// A handler that panics is logged and skipped; the remaining handlers still run and the
/// panic never reaches the emitter. Every emitted event is additionally published on a
/// broadcast channel for stream consumers.
pub struct EventDispatcher {
    handlers: DashMap<EventKind, Vec<(HandlerId, Handler)>>,
    next_id: AtomicU64,
    broadcast_tx: broadcast::Sender<Event>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: DashMap::new(),
            next_id: AtomicU64::new(0),
            broadcast_tx,
        }
    }

    /// Register `handler` for `kind`.
    ///
    /// The returned [`Subscription`] removes the handler again. Dropping it does not.
    pub fn on<F>(self: &Arc<Self>, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(kind.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            kind,
            id,
            dispatcher: Arc::downgrade(self),
        }
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, kind: &EventKind, id: HandlerId) -> bool {
        let Some(mut handlers) = self.handlers.get_mut(kind) else {
            return false;
        };

        let before = handlers.len();
        handlers.retain(|(registered, _)| *registered != id);
        let removed = handlers.len() != before;
        drop(handlers);

        self.handlers.remove_if(kind, |_, handlers| handlers.is_empty());
        removed
    }

    /// Invoke every handler registered for the event's kind.
    ///
    /// Returns the number of handlers that completed without panicking.
    pub fn emit(&self, event: &Event) -> usize {
        let kind = event.kind();
        // Snapshot so handlers can (un)register without holding the shard lock.
        let handlers: Vec<Handler> = self
            .handlers
            .get(&kind)
            .map(|entry| entry.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        let mut completed = 0_usize;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => completed += 1,
                Err(payload) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        event = %kind,
                        panic = panic_message(payload.as_ref()),
                        "Event handler panicked"
                    );
                    #[cfg(not(feature = "tracing"))]
                    let _ = &payload;
                }
            }
        }

        _ = self.broadcast_tx.send(event.clone());
        completed
    }

    #[must_use]
    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.get(kind).map_or(0, |handlers| handlers.len())
    }

    /// Receive every emitted event, regardless of kind.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }

    /// Stream every emitted event. Ends with [`WsError::Lagged`] if the consumer falls behind.
    pub fn stream(&self) -> impl Stream<Item = Result<Event>> + use<> {
        let mut rx = self.broadcast_tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Event stream lagged, missed {n} events");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("kinds", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tracing")]
fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle returned by [`EventDispatcher::on`].
#[derive(Debug, Clone)]
pub struct Subscription {
    kind: EventKind,
    id: HandlerId,
    dispatcher: Weak<EventDispatcher>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Remove the handler. Returns `false` if it was already removed.
    #[expect(
        clippy::needless_pass_by_value,
        reason = "Consuming the subscription makes a second unsubscribe impossible"
    )]
    pub fn unsubscribe(self) -> bool {
        self.dispatcher
            .upgrade()
            .is_some_and(|dispatcher| dispatcher.off(&self.kind, self.id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use futures::StreamExt as _;
    use serde_json::json;

    use super::*;
    use crate::ws::event::{ApplicationEvent, CloseInfo};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = Arc::clone(&count);
        (count, move |_: &Event| {
            handle.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn every_registered_handler_runs_once() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (first, first_handler) = counter();
        let (second, second_handler) = counter();
        _ = dispatcher.on(EventKind::Connected, first_handler);
        _ = dispatcher.on(EventKind::Connected, second_handler);

        let completed = dispatcher.emit(&Event::Connected);

        assert_eq!(completed, 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_the_others() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (count, handler) = counter();
        _ = dispatcher.on(EventKind::Connected, |_| panic!("handler failure"));
        _ = dispatcher.on(EventKind::Connected, handler);

        let completed = dispatcher.emit(&Event::Connected);

        assert_eq!(completed, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (count, handler) = counter();
        _ = dispatcher.on(EventKind::Disconnected, handler);

        dispatcher.emit(&Event::Connected);
        dispatcher.emit(&Event::Disconnected(CloseInfo::abnormal("reset")));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn application_handlers_receive_data_and_timestamp() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        _ = dispatcher.on(EventKind::application("topic_changed"), move |event| {
            if let Some(app) = event.as_application() {
                sink.lock().unwrap().push(app.data.clone());
            }
        });

        dispatcher.emit(&Event::Application(ApplicationEvent {
            name: "topic_changed".to_owned(),
            data: json!({"project_id": 7}),
            timestamp: None,
        }));
        dispatcher.emit(&Event::Application(ApplicationEvent {
            name: "scan_started".to_owned(),
            data: json!({}),
            timestamp: None,
        }));

        assert_eq!(*seen.lock().unwrap(), vec![json!({"project_id": 7})]);
    }

    #[test]
    fn unsubscribe_removes_only_that_handler() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (first, first_handler) = counter();
        let (second, second_handler) = counter();
        let subscription = dispatcher.on(EventKind::Error, first_handler);
        _ = dispatcher.on(EventKind::Error, second_handler);

        assert!(subscription.clone().unsubscribe());
        assert!(!subscription.unsubscribe());
        dispatcher.emit(&Event::Error {
            message: "boom".to_owned(),
        });

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.handler_count(&EventKind::Error), 1);
    }

    #[test]
    fn off_drops_empty_kinds() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let subscription = dispatcher.on(EventKind::Connected, |_| {});

        assert!(dispatcher.off(&EventKind::Connected, subscription.id()));
        assert_eq!(dispatcher.handler_count(&EventKind::Connected), 0);
        assert!(!dispatcher.off(&EventKind::Connected, subscription.id()));
    }

    #[test]
    fn handler_may_register_during_emit() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        _ = dispatcher.on(EventKind::Connected, move |_| {
            _ = inner.on(EventKind::Connected, |_| {});
        });

        assert_eq!(dispatcher.emit(&Event::Connected), 1);
        assert_eq!(dispatcher.handler_count(&EventKind::Connected), 2);
    }

    #[tokio::test]
    async fn stream_yields_emitted_events() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut stream = Box::pin(dispatcher.stream());

        dispatcher.emit(&Event::Connected);
        dispatcher.emit(&Event::MaxAttemptsReached);

        assert_eq!(stream.next().await.unwrap().unwrap(), Event::Connected);
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            Event::MaxAttemptsReached
        );
    }
}
