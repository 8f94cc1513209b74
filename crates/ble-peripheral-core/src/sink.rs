//! Backpressure-aware event sink and the stream on the other end of it
//!
//! The boundary keeps the [`EventStream`]; sessions only hold the
//! [`EventSink`]. Dropping the stream closes the sink, which is how a
//! subscriber detaches without going through the controller.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// Why an event could not be published
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishError {
    /// The stream is not keeping up; the event was dropped
    Full,
    /// The stream was dropped
    Closed,
}

/// Sending half held by a session
#[derive(Debug)]
pub struct EventSink<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSink<T> {
    /// Publish without blocking the caller
    pub fn try_publish(&self, event: T) -> Result<(), PublishError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PublishError::Full,
            mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Whether both sinks feed the same stream
    pub fn same_stream(&self, other: &EventSink<T>) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Receiving half held by the subscriber; a lazy sequence of events
#[derive(Debug)]
pub struct EventStream<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> EventStream<T> {
    /// Wait for the next event; `None` once every sink is gone
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take an already-buffered event without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting events; buffered ones can still be received
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a connected sink/stream pair buffering up to `capacity` events
pub fn event_channel<T>(capacity: usize) -> (EventSink<T>, EventStream<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSink { tx }, EventStream { rx })
}
