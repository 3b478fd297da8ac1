//! EventBus: in-process fan-out from the control loop to observers
//!
//! Every subscriber owns a bounded queue. `publish` never waits: a full
//! queue drops the event for that subscriber only, and a closed queue
//! (subscriber dropped or panicked) unregisters it. Order is preserved per
//! subscriber.

use reverie_core::EngineEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<EngineEvent>,
}

struct BusInner {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
    closed: AtomicBool,
    dropped: AtomicU64,
    next_id: AtomicU64,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                capacity: capacity.max(1),
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.inner.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Hand `event` to every subscriber queue. Never blocks.
    pub fn publish(&self, event: EngineEvent) {
        if self.is_closed() {
            debug!("Bus closed, dropping {}", event.kind());
            return;
        }
        if let EngineEvent::Log(text) = &event {
            info!(target: "reverie::events", "{}", text);
        }
        let mut subs = self.subscribers();
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Subscriber {} queue full ({}), dropped {}",
                    sub.id,
                    self.inner.capacity,
                    dropped.kind()
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Subscriber {} went away, unregistering", sub.id);
                false
            }
        });
    }

    /// Raw receiving end of a new subscription.
    pub fn subscribe_channel(&self) -> mpsc::Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        if self.is_closed() {
            // Sender dropped right away: the receiver reports end of stream.
            return rx;
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers().push(Subscriber { id, tx });
        rx
    }

    /// Deliver events to `handler` on its own task, in publish order.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn subscribe<F>(&self, mut handler: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(EngineEvent) + Send + 'static,
    {
        let mut rx = self.subscribe_channel();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        })
    }

    /// Stop accepting events and release every subscriber queue.
    /// Already-queued events are still delivered.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.subscribers().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Events dropped on full queues since creation.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}
