//! Capture subscription deliveries for assertions.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::watch;

/// How long [`Recorder::wait_for`] waits before giving up.
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Records every value handed to its callback.
#[derive(Clone)]
pub struct Recorder<T> {
    deliveries: Arc<Mutex<Vec<T>>>,
    version: Arc<watch::Sender<usize>>,
}

impl<T: Clone + Send + 'static> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self { deliveries: Arc::new(Mutex::new(Vec::new())), version: Arc::new(watch::Sender::new(0)) }
    }

    /// Callback to pass to `subscribe`.
    pub fn callback(&self) -> impl Fn(T) + Send + Sync + 'static {
        let recorder = self.clone();
        move |value| {
            recorder.deliveries.lock().unwrap_or_else(PoisonError::into_inner).push(value);
            recorder.version.send_modify(|version| *version += 1);
        }
    }

    /// All deliveries so far.
    pub fn deliveries(&self) -> Vec<T> {
        self.deliveries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recent delivery.
    pub fn latest(&self) -> Option<T> {
        self.deliveries.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }

    /// Number of deliveries so far.
    pub fn count(&self) -> usize {
        self.deliveries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Wait until the latest delivery satisfies `predicate`.
    ///
    /// Returns `None` after [`WAIT_LIMIT`].
    pub async fn wait_for(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        let mut version = self.version.subscribe();
        let search = async {
            loop {
                if let Some(latest) = self.latest().filter(|latest| predicate(latest)) {
                    return Some(latest);
                }
                if version.changed().await.is_err() {
                    return None;
                }
            }
        };
        tokio::time::timeout(WAIT_LIMIT, search).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_sees_later_delivery() {
        let recorder = Recorder::<u32>::new();
        let callback = recorder.callback();

        let waiter = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.wait_for(|v| *v == 3).await })
        };
        for value in 1..=3 {
            callback(value);
        }

        assert_eq!(waiter.await.unwrap(), Some(3));
        assert_eq!(recorder.deliveries(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_gives_up() {
        let recorder = Recorder::<u32>::new();

        assert_eq!(recorder.wait_for(|_| true).await, None);
    }
}
