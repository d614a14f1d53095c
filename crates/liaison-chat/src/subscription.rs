//! Disposable subscriptions.
//!
//! Every `subscribe` call spawns a listener task and returns a
//! [`Subscription`]. The task hands values to a [`Listener`], which owns the
//! caller's callback behind a delivery gate.
//!
//! # Invariants
//!
//! - After [`Subscription::dispose`] returns, the callback is never invoked
//!   again. A delivery already running on another thread is joined first.
//! - Disposing from inside any callback (this subscription's or another's)
//!   does not deadlock. It blocks further deliveries but does not wait for
//!   one already running on another thread. Two callbacks on different
//!   workers may therefore dispose each other.
//! - Disposing twice is a no-op. Dropping the handle disposes.

use std::{
    cell::Cell,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use tokio::task::AbortHandle;

type Callback<T> = Box<dyn Fn(T) + Send + Sync>;

thread_local! {
    /// Callbacks currently running on this thread
    static DELIVERY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks the current thread as inside a callback until dropped.
struct DeliveryScope;

impl DeliveryScope {
    fn enter() -> Self {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }

    fn active() -> bool {
        DELIVERY_DEPTH.with(Cell::get) > 0
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Callback holder shared between a listener task and its [`Subscription`].
pub(crate) struct Listener<T> {
    callback: Mutex<Option<Callback<T>>>,
    disposed: AtomicBool,
}

impl<T: 'static> Listener<T> {
    pub(crate) fn new(callback: impl Fn(T) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            callback: Mutex::new(Some(Box::new(callback))),
            disposed: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Invoke the callback unless disposed.
    ///
    /// Returns `false` once the listener is disposed, telling the task to
    /// stop.
    pub(crate) fn deliver(&self, value: T) -> bool {
        if self.is_disposed() {
            return false;
        }

        let gate = lock(&self.callback);
        // Re-check under the gate: dispose may have won the race
        if self.is_disposed() {
            return false;
        }
        let Some(callback) = gate.as_ref() else {
            return false;
        };

        let scope = DeliveryScope::enter();
        callback(value);
        drop(scope);
        drop(gate);

        !self.is_disposed()
    }

    fn dispose_callback(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if DeliveryScope::active() {
            // Inside a callback: the gate may be ours, or another thread may
            // be waiting on ours. The disposed flag blocks the next delivery.
            return;
        }

        // Joins any in-flight delivery on another thread
        lock(&self.callback).take();
    }
}

trait Dispose: Send + Sync {
    fn dispose(&self);
    fn is_disposed(&self) -> bool;
}

impl<T: 'static> Dispose for Listener<T> {
    fn dispose(&self) {
        self.dispose_callback();
    }

    fn is_disposed(&self) -> bool {
        Listener::is_disposed(self)
    }
}

/// Handle returned by every `subscribe` call.
///
/// Call [`Subscription::dispose`] (or drop the handle) to stop deliveries.
#[must_use = "dropping a Subscription disposes it immediately"]
pub struct Subscription {
    listener: Arc<dyn Dispose>,
    task: AbortHandle,
}

impl Subscription {
    pub(crate) fn new<T: 'static>(listener: Arc<Listener<T>>, task: AbortHandle) -> Self {
        Self { listener, task }
    }

    /// Stop deliveries and cancel the listener task. Idempotent.
    pub fn dispose(&self) {
        self.listener.dispose();
        self.task.abort();
    }

    /// Whether the callback may still be invoked.
    pub fn is_active(&self) -> bool {
        !self.listener.is_disposed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.is_active()).finish()
    }
}
