use dashmap::DashMap;
use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
struct ListenersRef<T> {
    id: AtomicU64,
    listeners: DashMap<u64, UnboundedSender<T>>,
}

impl<T> Default for ListenersRef<T> {
    fn default() -> Self {
        Self {
            id: AtomicU64::new(0),
            listeners: DashMap::new(),
        }
    }
}

/// Set of live subscribers sharing one event source.
#[derive(Debug)]
pub(crate) struct Listeners<T>(Arc<ListenersRef<T>>);

impl<T> Listeners<T> {
    /// Register a new subscriber.
    pub fn add(&self) -> EventStream<T> {
        let id = self.0.id.fetch_add(1, Ordering::Release) + 1;
        let (tx, rx) = mpsc::unbounded_channel();

        self.0.listeners.insert(id, tx);

        EventStream {
            id,
            listeners: Arc::clone(&self.0),
            rx,
        }
    }

    /// Drop every subscriber, ending their streams.
    pub fn close(&self) {
        self.0.listeners.clear();
    }

    /// Number of live subscribers.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.listeners.len()
    }
}

impl<T: Clone> Listeners<T> {
    /// Broadcast an event, pruning subscribers that have gone away.
    pub fn send(&self, event: T) {
        self.0
            .listeners
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self(Arc::new(ListenersRef::default()))
    }
}

/// Stream of events for one subscriber.
///
/// Dropping the stream unsubscribes it; no explicit disposal call exists or
/// is needed.
#[derive(Debug)]
pub struct EventStream<T> {
    id: u64,
    listeners: Arc<ListenersRef<T>>,
    rx: UnboundedReceiver<T>,
}

impl<T> EventStream<T> {
    /// Receive the next event, or `None` once the source closes.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> futures_util::Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for EventStream<T> {
    fn drop(&mut self) {
        self.listeners.listeners.remove(&self.id);
    }
}
