//! Join primitives for concurrent resolution and materialization.
//!
//! [`Barrier`] is a wait-group: every outstanding operation holds a
//! [`Signal`], and waiters are woken when the last one is released. Barriers
//! can be staged: a parent is only ready once its own signals are released
//! *and* then each of its children is ready.
//!
//! Two join policies are built on top:
//! - [`join_settled`] waits for every sibling and reports the first error.
//! - [`join_first_error`] reports the first error immediately. Siblings are
//!   never cancelled; they keep running as detached tasks and can still be
//!   awaited through the barrier they were registered with.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinError;

/// Wait-group over outstanding [`Signal`]s, with optional staged children.
#[derive(Debug, Clone)]
pub struct Barrier {
    pending: Arc<watch::Sender<usize>>,
    children: Arc<Mutex<Vec<Barrier>>>,
}

/// One outstanding operation. Released by [`Signal::done`] or on drop.
#[derive(Debug)]
pub struct Signal {
    pending: Option<Arc<watch::Sender<usize>>>,
}

impl Default for Barrier {
    fn default() -> Self {
        Self::new()
    }
}

impl Barrier {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            pending: Arc::new(tx),
            children: Arc::default(),
        }
    }

    /// Register one more outstanding operation.
    #[must_use]
    pub fn signal(&self) -> Signal {
        self.pending.send_modify(|n| *n += 1);
        Signal {
            pending: Some(Arc::clone(&self.pending)),
        }
    }

    /// Create a child barrier that this one waits on after its own signals.
    ///
    /// Retired children are dropped from the list first.
    #[must_use]
    pub fn child(&self) -> Barrier {
        let child = Barrier::new();
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|c| !c.is_retired());
        children.push(child.clone());
        child
    }

    /// No handle or signal refers to this barrier outside its parent's list,
    /// and the same holds for all of its children.
    fn is_retired(&self) -> bool {
        Arc::strong_count(&self.pending) == 1
            && self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .all(Barrier::is_retired)
    }

    /// Signals of this barrier (not its children) still outstanding.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until every signal is released, then every child is ready.
    pub fn wait(&self) -> BoxFuture<'_, ()> {
        async move {
            let mut rx = self.pending.subscribe();
            loop {
                let ready = *rx.borrow_and_update() == 0;
                // The sender lives as long as `self`, so `changed` only fails if it is gone
                if ready || rx.changed().await.is_err() {
                    break;
                }
            }

            let children: Vec<Barrier> = self
                .children
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for child in &children {
                child.wait().await;
            }
        }
        .boxed()
    }

    /// Run `f` exactly once, when the barrier becomes ready.
    pub async fn on_complete<F: FnOnce()>(&self, f: F) {
        self.wait().await;
        f();
    }
}

impl Signal {
    /// Mark the operation finished.
    pub fn done(self) {}
}

impl Drop for Signal {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.send_modify(|n| *n = n.saturating_sub(1));
        }
    }
}

/// Drive every future to completion, then report.
///
/// Returns the outputs in input order, or the first error observed in
/// completion order. Later errors are discarded.
///
/// # Errors
/// Returns the first error any future produced.
pub async fn join_settled<I, F, T, E>(futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let mut in_flight: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(i, fut)| async move { (i, fut.await) })
        .collect();

    let mut outputs = Vec::with_capacity(in_flight.len());
    let mut first_error = None;

    while let Some((i, result)) = in_flight.next().await {
        match result {
            Ok(value) => outputs.push((i, value)),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }

    outputs.sort_by_key(|(i, _)| *i);
    Ok(outputs.into_iter().map(|(_, value)| value).collect())
}

/// Spawn every future and report as soon as one fails.
///
/// Each future runs as its own task holding a signal on `barrier`. When a
/// future fails its error is returned right away; the remaining tasks are
/// not cancelled and their outcomes are discarded. Await `barrier` to know
/// when they have all landed.
///
/// # Errors
/// Returns the first error in completion order, or a task failure.
pub async fn join_first_error<I, F, T, E>(barrier: &Barrier, futures: I) -> Result<Vec<T>, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    let mut handles: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(i, fut)| {
            let signal = barrier.signal();
            let handle = tokio::spawn(async move {
                let output = fut.await;
                signal.done();
                output
            });
            async move { (i, handle.await) }
        })
        .collect();

    let mut outputs = Vec::with_capacity(handles.len());

    while let Some((i, joined)) = handles.next().await {
        match joined {
            Ok(Ok(value)) => outputs.push((i, value)),
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(E::from(e)),
        }
    }

    outputs.sort_by_key(|(i, _)| *i);
    Ok(outputs.into_iter().map(|(_, value)| value).collect())
}
