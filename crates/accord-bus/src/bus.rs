//! The message bus and its delayed-delivery worker

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::event::{BusEvent, EventKind, Payload};
use crate::pending::{PendingHandle, PendingResult};

/// Upper bound on one worker-cycle pause while the head event is not yet
/// due; a younger event queued behind it waits at most this long extra
pub const WORKER_NAP: Duration = Duration::from_millis(100);

/// Subscriber callback, run on whichever task dispatches the event
pub type Callback = Arc<dyn Fn(&mut BusEvent) + Send + Sync>;

struct Registry {
    by_kind: Mutex<HashMap<EventKind, Vec<Callback>>>,
    catch_all: Mutex<Vec<Callback>>,
}

struct Shared {
    /// Delay-aware FIFO; guarded separately from the subscriber registry
    /// so registration never orders against delivery
    queue: Mutex<VecDeque<BusEvent>>,
    queue_notify: Notify,
    registry: Registry,
    shutdown: AtomicBool,
}

impl Shared {
    /// Fan out one event: kind subscribers in registration order, then
    /// catch-all subscribers, stopping once a callback marks it handled
    fn dispatch(&self, mut event: BusEvent) {
        let kind_subs: Vec<Callback> = self
            .registry
            .by_kind
            .lock()
            .get(&event.kind)
            .map(|subs| subs.to_vec())
            .unwrap_or_default();

        for callback in &kind_subs {
            callback(&mut event);
            if event.is_handled() {
                return;
            }
        }

        let global_subs: Vec<Callback> = self.registry.catch_all.lock().to_vec();
        for callback in &global_subs {
            callback(&mut event);
            if event.is_handled() {
                return;
            }
        }

        if kind_subs.is_empty() && global_subs.is_empty() {
            debug!("no subscriber for {:?}", event.kind);
        }
    }

    fn enqueue(&self, event: BusEvent) {
        self.queue.lock().push_back(event);
        self.queue_notify.notify_one();
    }
}

/// The message/event bus
///
/// One dedicated worker task drives delayed delivery; `send` fans out on
/// the calling task. Teardown via [`close`](Self::close) joins the worker;
/// queued-but-undelivered events are dropped, not drained.
pub struct MessageBus {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageBus {
    /// Create the bus and start its delivery worker
    pub fn new() -> Arc<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            queue_notify: Notify::new(),
            registry: Registry {
                by_kind: Mutex::new(HashMap::new()),
                catch_all: Mutex::new(Vec::new()),
            },
            shutdown: AtomicBool::new(false),
        });

        let worker = tokio::spawn(Self::run_worker(shared.clone()));

        Arc::new(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Delivery loop: pop the oldest event; if it is not yet due,
    /// re-enqueue it and nap before re-checking. Anything queued behind a
    /// not-yet-due event waits at most one nap per cycle
    async fn run_worker(shared: Arc<Shared>) {
        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            let notified = shared.queue_notify.notified();
            let head = shared.queue.lock().pop_front();

            match head {
                None => notified.await,
                Some(event) => match event.remaining(Instant::now()) {
                    None => shared.dispatch(event),
                    Some(remaining) => {
                        shared.queue.lock().push_back(event);
                        tokio::time::sleep(remaining.min(WORKER_NAP)).await;
                    }
                },
            }
        }

        let dropped = shared.queue.lock().len();
        if dropped > 0 {
            warn!("bus torn down with {} undelivered events", dropped);
        }
    }

    /// Enqueue an event for asynchronous delivery; never blocks
    pub fn post(&self, kind: EventKind, payload: Payload) {
        self.shared.enqueue(BusEvent::new(kind, payload));
    }

    /// Enqueue an event not deliverable before `delay` elapses
    pub fn post_delayed(&self, kind: EventKind, payload: Payload, delay: Duration) {
        self.shared.enqueue(BusEvent::delayed(kind, payload, delay));
    }

    /// Synchronous fan-out on the calling task, same short-circuit rule as
    /// the delivery loop
    pub fn send(&self, kind: EventKind, payload: Payload) {
        self.shared.dispatch(BusEvent::new(kind, payload));
    }

    /// Post a request event and return its result handle
    ///
    /// Exactly one responder reachable from a different task must answer,
    /// or the eventual [`PendingResult::wait`] blocks forever; there is no
    /// built-in timeout.
    pub fn request(&self, kind: EventKind, payload: Payload) -> PendingHandle {
        let handle = PendingResult::new();
        let mut event = BusEvent::new(kind, payload);
        event.result = Some(handle.clone());
        self.shared.enqueue(event);
        handle
    }

    /// Register a callback for one event kind; callbacks for a kind run in
    /// registration order
    pub fn subscribe<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&mut BusEvent) + Send + Sync + 'static,
    {
        self.shared
            .registry
            .by_kind
            .lock()
            .entry(kind)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Register a callback for every event kind, run after kind-specific
    /// subscribers
    pub fn subscribe_all<F>(&self, callback: F)
    where
        F: Fn(&mut BusEvent) + Send + Sync + 'static,
    {
        self.shared.registry.catch_all.lock().push(Arc::new(callback));
    }

    /// Stop the worker and join it; undelivered events are dropped
    pub async fn close(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue_notify.notify_one();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }
}
