//! Browser-originated events and subscriptions.
//!
//! Every emitted event is appended to its context's occurrence log and
//! delivered to each live subscription whose kind matches. A subscription
//! only sees events emitted after it was registered; anything earlier is
//! found with a snapshot of the log. Registering first and then reading the
//! snapshot covers both sides of the race.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use visreg_core::{CancelToken, ContextId};

/// Kind of asynchronous browser event.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A background worker finished registering.
    WorkerRegistered,
    /// A background worker took control of its scope.
    WorkerActivated,
    /// The page started a download.
    DownloadStarted,
    /// The page wrote to its console.
    ConsoleMessage,
    Custom(String),
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkerRegistered => write!(f, "worker-registered"),
            Self::WorkerActivated => write!(f, "worker-activated"),
            Self::DownloadStarted => write!(f, "download-started"),
            Self::ConsoleMessage => write!(f, "console-message"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// One occurrence of a browser event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrowserEvent {
    /// Position in the context's event log.
    pub seq: u64,
    pub context: ContextId,
    pub kind: EventKind,
    /// Event subject: worker scope URL, download file name, message text.
    pub identifier: String,
    pub at: Instant,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    #[error("No {kind} event within {timeout:?}")]
    Timeout { kind: EventKind, timeout: Duration },
    #[error("Wait for {kind} event was cancelled")]
    Cancelled { kind: EventKind },
    #[error("Browsing context {0} closed while waiting")]
    ContextClosed(ContextId),
}

struct Subscriber {
    id: u64,
    kind: EventKind,
    tx: Sender<BrowserEvent>,
}

#[derive(Default)]
struct LogState {
    occurrences: Vec<BrowserEvent>,
    subscribers: Vec<Subscriber>,
    next_seq: u64,
    next_subscriber: u64,
    closed: bool,
}

/// Per-context event log plus live subscriptions.
#[derive(Default)]
pub(crate) struct EventLog {
    state: Mutex<LogState>,
}

impl EventLog {
    /// Record an event and deliver it to matching subscribers.
    pub(crate) fn emit(&self, context: ContextId, kind: EventKind, identifier: String) -> BrowserEvent {
        let mut state = self.state.lock();
        let event = BrowserEvent {
            seq: state.next_seq,
            context,
            kind,
            identifier,
            at: Instant::now(),
        };
        state.next_seq += 1;
        state.occurrences.push(event.clone());

        // Subscribers whose receiver is gone are pruned on the way.
        state.subscribers.retain(|sub| {
            if sub.kind != event.kind {
                return true;
            }
            sub.tx.send(event.clone()).is_ok()
        });

        event
    }

    pub(crate) fn subscribe(self: &Arc<Self>, context: ContextId, kind: EventKind) -> Subscription {
        let (tx, rx) = channel::unbounded();
        let mut state = self.state.lock();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        let start_seq = state.next_seq;

        // A closed log keeps no senders, so the receiver reports disconnect.
        if !state.closed {
            state.subscribers.push(Subscriber {
                id,
                kind: kind.clone(),
                tx,
            });
        }

        Subscription {
            id,
            context,
            kind,
            start_seq,
            rx,
            log: Arc::clone(self),
        }
    }

    pub(crate) fn occurrences(&self, kind: &EventKind) -> Vec<BrowserEvent> {
        self.state
            .lock()
            .occurrences
            .iter()
            .filter(|e| e.kind == *kind)
            .cloned()
            .collect()
    }

    /// Drop all subscribers and the occurrence log; pending waits fail with
    /// `ContextClosed`.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.subscribers = Vec::new();
        state.occurrences = Vec::new();
    }

    fn unsubscribe(&self, id: u64) {
        self.state.lock().subscribers.retain(|sub| sub.id != id);
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

/// Registered interest in future events of one kind.
///
/// Each matching event emitted after registration is delivered exactly once.
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: u64,
    context: ContextId,
    kind: EventKind,
    start_seq: u64,
    rx: Receiver<BrowserEvent>,
    log: Arc<EventLog>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("context", &self.context)
            .field("kind", &self.kind)
            .field("start_seq", &self.start_seq)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    #[must_use]
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }

    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// Sequence number of the first event this subscription can receive.
    #[must_use]
    pub const fn start_seq(&self) -> u64 {
        self.start_seq
    }

    /// Take an already delivered event without blocking.
    pub fn try_next(&self) -> Option<BrowserEvent> {
        self.rx.try_recv().ok()
    }

    /// Block until the next matching event, the timeout, or cancellation.
    pub fn next(&self, timeout: Duration, cancel: &CancelToken) -> Result<BrowserEvent, WaitError> {
        // Events that already arrived win over a cancellation racing them.
        if let Ok(event) = self.rx.try_recv() {
            return Ok(event);
        }
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled {
                kind: self.kind.clone(),
            });
        }

        crossbeam::select! {
            recv(self.rx) -> msg => msg.map_err(|_| WaitError::ContextClosed(self.context)),
            recv(cancel.signal()) -> _ => Err(WaitError::Cancelled { kind: self.kind.clone() }),
            default(timeout) => Err(WaitError::Timeout { kind: self.kind.clone(), timeout }),
        }
    }

    /// Wait for the next matching event and consume the subscription.
    pub fn wait(self, timeout: Duration, cancel: &CancelToken) -> Result<BrowserEvent, WaitError> {
        self.next(timeout, cancel)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.log.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn log() -> (Arc<EventLog>, ContextId) {
        (Arc::new(EventLog::default()), ContextId::next())
    }

    #[test]
    fn subscription_receives_future_event() {
        let (log, ctx) = log();
        let sub = log.subscribe(ctx, EventKind::WorkerRegistered);

        let emitter = Arc::clone(&log);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            emitter.emit(ctx, EventKind::WorkerRegistered, "/sw.js".into());
        });

        let event = sub
            .wait(Duration::from_secs(5), &CancelToken::new())
            .unwrap();
        assert_eq!(event.identifier, "/sw.js");
        handle.join().unwrap();
    }

    #[test]
    fn subscription_misses_past_events_but_snapshot_has_them() {
        let (log, ctx) = log();
        log.emit(ctx, EventKind::WorkerRegistered, "/sw.js".into());

        let sub = log.subscribe(ctx, EventKind::WorkerRegistered);
        assert_eq!(sub.start_seq(), 1);
        assert!(sub.try_next().is_none());

        let past = log.occurrences(&EventKind::WorkerRegistered);
        assert_eq!(past.len(), 1);
        assert_eq!(past[0].identifier, "/sw.js");
    }

    #[test]
    fn each_occurrence_delivered_once() {
        let (log, ctx) = log();
        let sub = log.subscribe(ctx, EventKind::DownloadStarted);
        log.emit(ctx, EventKind::DownloadStarted, "a.csv".into());
        log.emit(ctx, EventKind::ConsoleMessage, "noise".into());
        log.emit(ctx, EventKind::DownloadStarted, "b.csv".into());

        let cancel = CancelToken::new();
        let timeout = Duration::from_millis(50);
        assert_eq!(sub.next(timeout, &cancel).unwrap().identifier, "a.csv");
        assert_eq!(sub.next(timeout, &cancel).unwrap().identifier, "b.csv");
        assert!(matches!(
            sub.next(timeout, &cancel),
            Err(WaitError::Timeout { .. })
        ));
    }

    #[test]
    fn cancellation_stops_wait() {
        let (log, ctx) = log();
        let sub = log.subscribe(ctx, EventKind::WorkerRegistered);
        let cancel = CancelToken::new();

        let canceller = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(matches!(
            sub.wait(Duration::from_secs(10), &cancel),
            Err(WaitError::Cancelled { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn close_disconnects_waiters() {
        let (log, ctx) = log();
        let sub = log.subscribe(ctx, EventKind::WorkerRegistered);
        log.close();
        assert_eq!(
            sub.wait(Duration::from_secs(5), &CancelToken::new()),
            Err(WaitError::ContextClosed(ctx))
        );
    }

    #[test]
    fn close_releases_occurrences() {
        let (log, ctx) = log();
        for i in 0..3 {
            log.emit(ctx, EventKind::ConsoleMessage, format!("line {i}"));
        }
        assert_eq!(log.occurrences(&EventKind::ConsoleMessage).len(), 3);

        log.close();
        assert!(log.occurrences(&EventKind::ConsoleMessage).is_empty());
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn drop_unsubscribes() {
        let (log, ctx) = log();
        let sub = log.subscribe(ctx, EventKind::WorkerRegistered);
        assert_eq!(log.subscriber_count(), 1);
        drop(sub);
        assert_eq!(log.subscriber_count(), 0);
    }
}
