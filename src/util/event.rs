//! A multi-waiter wakeup, the async analogue of the original's
//! timer-cancellation hack (see `util/Event.cpp`). We use
//! [`tokio::sync::Notify`] directly instead of reimplementing a
//! timer-based retry loop: `notify_waiters` already wakes every pending
//! `wait()` and spurious wakeups are harmless here, since every waiter
//! re-checks its own condition after waking.

use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct Event {
    inner: Arc<Notify>,
}

impl Event {
    pub fn new() -> Self {
        Event {
            inner: Arc::new(Notify::new()),
        }
    }

    /// Suspend until the next `notify_all`. Spurious wakeups are permitted;
    /// callers must re-check their own condition.
    pub async fn wait(&self) {
        self.inner.notified().await;
    }

    /// Subscribes to the next `notify_all` without suspending. Callers that
    /// re-check a condition before waiting must obtain this future first,
    /// then check the condition, then await it — creating the future after
    /// the check risks missing a `notify_all` that lands in between, which
    /// is fatal when that notification is also the last one that will ever
    /// come (e.g. end-of-stream).
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.inner.notified()
    }

    pub fn notify_all(&self) {
        self.inner.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wakes_waiter() {
        let ev = Event::new();
        let ev2 = ev.clone();
        let task = tokio::spawn(async move {
            ev2.wait().await;
        });
        tokio::task::yield_now().await;
        ev.notify_all();
        task.await.unwrap();
    }
}
