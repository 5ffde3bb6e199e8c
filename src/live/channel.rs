//! # Output Channel
//!
//! Multicast, single-slot replay stream of snapshots. A new subscriber first
//! receives the most recent value, then every later one. The channel
//! completes exactly once and never carries an error: consumers see values
//! followed by end-of-stream.
//!
//! Completion is bidirectional. The engine completes the channel when its
//! loop ends; a consumer completing it cancels the linked token, which stops
//! the engine loop.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Why a live query stopped
///
/// Only available on the handle; the stream itself just ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionReason {
    /// Consumer unsubscribed or dropped the handle
    Unsubscribed,
    /// Subscription or engine was cancelled
    Cancelled,
    /// The store ended the change feed
    FeedEnded,
    /// Unrecoverable failure; the error was logged
    Failed(String),
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::Unsubscribed => write!(f, "unsubscribed"),
            CompletionReason::Cancelled => write!(f, "cancelled"),
            CompletionReason::FeedEnded => write!(f, "feed ended"),
            CompletionReason::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

struct SubjectState<T> {
    latest: Option<T>,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    completion: Option<CompletionReason>,
}

/// Single-slot replay broadcast
pub struct ReplaySubject<T> {
    state: Arc<Mutex<SubjectState<T>>>,
    closed: CancellationToken,
}

impl<T> Clone for ReplaySubject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            closed: self.closed.clone(),
        }
    }
}

impl<T: Clone> Default for ReplaySubject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> ReplaySubject<T> {
    /// Create a subject with its own completion token
    pub fn new() -> Self {
        Self::linked(CancellationToken::new())
    }

    /// Create a subject whose completion cancels `token`
    ///
    /// Cancelling `token` from elsewhere does not complete the subject; the
    /// owner of the token is expected to do that during its own cleanup.
    pub fn linked(token: CancellationToken) -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                latest: None,
                subscribers: Vec::new(),
                completion: None,
            })),
            closed: token,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SubjectState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish a value; false once the subject has completed
    pub fn next(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.completion.is_some() {
            return false;
        }
        state.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        state.latest = Some(value);
        true
    }

    /// Attach a subscriber
    ///
    /// The latest value, if any, is delivered before anything else. After
    /// completion the returned stream is already ended.
    pub fn subscribe(&self) -> Snapshots<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if state.completion.is_none() {
            if let Some(latest) = &state.latest {
                let _ = tx.send(latest.clone());
            }
            state.subscribers.push(tx);
        }
        Snapshots { receiver: rx }
    }

    /// Complete the subject; true only for the call that completed it
    pub fn complete(&self, reason: CompletionReason) -> bool {
        {
            let mut state = self.lock();
            if state.completion.is_some() {
                return false;
            }
            state.completion = Some(reason);
            // dropping the senders ends every subscriber stream
            state.subscribers.clear();
        }
        self.closed.cancel();
        true
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completion.is_some()
    }

    /// Reason the subject completed, if it has
    pub fn completion(&self) -> Option<CompletionReason> {
        self.lock().completion.clone()
    }

    /// Most recently published value
    pub fn latest(&self) -> Option<T> {
        self.lock().latest.clone()
    }
}

/// A subscriber's view of a [`ReplaySubject`]
pub struct Snapshots<T> {
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Snapshots<T> {
    /// Next value, or `None` once the subject has completed
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Next value if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for Snapshots<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.receiver.poll_recv(cx)
    }
}
