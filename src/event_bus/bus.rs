//! Ledger-backed event bus with ordered, restartable subscriptions.
//!
//! Every emitted event is appended to an in-memory ledger and fanned out to
//! attached sinks synchronously. Subscribers read the ledger through a
//! cursor, so a late subscriber sees the full history and any stream can be
//! rewound with [`EventStream::restart`]. Live notification rides a tokio
//! `watch` channel carrying `(ledger_len, closed)`.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::emitter::{EmitterError, EventEmitter};
use super::event::Event;
use super::sink::EventSink;

struct BusInner {
    ledger: Mutex<Vec<Event>>,
    sinks: Mutex<Vec<Box<dyn EventSink>>>,
    notify: watch::Sender<(usize, bool)>,
}

/// Shared event hub for one run. Cloning is cheap; all clones share the
/// same ledger and sinks.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (notify, _) = watch::channel((0, false));
        Self {
            inner: Arc::new(BusInner {
                ledger: Mutex::new(Vec::new()),
                sinks: Mutex::new(Vec::new()),
                notify,
            }),
        }
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a sink; it receives every event emitted from now on.
    pub fn add_sink(&self, sink: Box<dyn EventSink>) {
        if let Ok(mut sinks) = self.inner.sinks.lock() {
            sinks.push(sink);
        }
    }

    /// Write handle for producers.
    #[must_use]
    pub fn emitter(&self) -> Arc<dyn EventEmitter> {
        Arc::new(BusEmitter {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Ordered subscription starting at the beginning of the ledger.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            inner: Arc::clone(&self.inner),
            rx: self.inner.notify.subscribe(),
            cursor: 0,
        }
    }

    /// Snapshot of all events emitted so far.
    #[must_use]
    pub fn ledger(&self) -> Vec<Event> {
        self.inner
            .ledger
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    /// Marks the bus closed. Streams drain the remaining ledger and then
    /// end; further emits fail with [`EmitterError::Closed`].
    pub fn close(&self) {
        let len = self
            .inner
            .ledger
            .lock()
            .map(|l| l.len())
            .unwrap_or_default();
        let _ = self.inner.notify.send((len, true));
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.notify.borrow().1
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self
            .inner
            .ledger
            .lock()
            .map(|l| l.len())
            .unwrap_or_default();
        f.debug_struct("EventBus")
            .field("events", &len)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct BusEmitter {
    inner: Arc<BusInner>,
}

impl EventEmitter for BusEmitter {
    fn emit(&self, event: Event) -> Result<(), EmitterError> {
        if self.inner.notify.borrow().1 {
            return Err(EmitterError::Closed);
        }
        let len = {
            let mut ledger = self
                .inner
                .ledger
                .lock()
                .map_err(|_| EmitterError::Closed)?;
            ledger.push(event.clone());
            ledger.len()
        };
        if let Ok(mut sinks) = self.inner.sinks.lock() {
            for sink in sinks.iter_mut() {
                if let Err(e) = sink.handle(&event) {
                    tracing::warn!(error = %e, "event sink failed");
                }
            }
        }
        let _ = self.inner.notify.send((len, false));
        Ok(())
    }
}

/// Ordered cursor over a run's event ledger.
///
/// `next` yields events in emission order and waits for new ones while the
/// bus is open; once the bus closes and the ledger is drained it returns
/// `None`. [`restart`](Self::restart) rewinds to the first event, replaying
/// the full history.
pub struct EventStream {
    inner: Arc<BusInner>,
    rx: watch::Receiver<(usize, bool)>,
    cursor: usize,
}

impl EventStream {
    fn poll_ledger(&mut self) -> Option<Event> {
        let ledger = self.inner.ledger.lock().ok()?;
        if self.cursor < ledger.len() {
            let event = ledger[self.cursor].clone();
            self.cursor += 1;
            Some(event)
        } else {
            None
        }
    }

    /// Next event in emission order, waiting if none is available yet.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            if let Some(event) = self.poll_ledger() {
                return Some(event);
            }
            if self.rx.borrow().1 {
                return None;
            }
            if self.rx.changed().await.is_err() {
                // Bus dropped; drain whatever is left.
                return self.poll_ledger();
            }
        }
    }

    /// Next event if one is already available; never waits.
    pub fn try_next(&mut self) -> Option<Event> {
        self.poll_ledger()
    }

    /// Rewinds the cursor to the first event. The stream replays the whole
    /// history and then continues live.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// Position of the cursor in the ledger.
    #[must_use]
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Adapts this stream to a `futures_util::Stream` for combinator use.
    pub fn into_async_stream(self) -> impl futures_util::Stream<Item = Event> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }
}
