use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::models::verification::QueueSnapshot;

/// Admission was rejected because the service is at capacity. Final for
/// this call; the caller may resubmit later.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("verification queue is full")]
pub struct QueueFull;

struct PoolState {
    running: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Bounded FIFO admission gate in front of a fixed number of execution
/// slots.
///
/// Admission ("check capacity, then enqueue") is a single critical
/// section: a request is rejected outright when `running + queued` has
/// reached `max_queue`, otherwise it either takes a free slot immediately
/// or joins the FIFO tail. A released slot is handed directly to the head
/// waiter inside the release critical section, so execution order is
/// strictly admission order and `running` never exceeds `max_concurrent`.
#[derive(Clone)]
pub struct SlotPool {
    max_concurrent: usize,
    max_queue: usize,
    inner: Arc<Mutex<PoolState>>,
}

/// Outcome of a successful admission.
pub enum Admission {
    /// A slot was free; the job may run immediately.
    Ready(SlotGuard),
    /// Admitted to the FIFO; await the ticket for a slot.
    Queued(SlotTicket),
}

impl SlotPool {
    pub fn new(max_concurrent: usize, max_queue: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            max_queue: max_queue.max(1),
            inner: Arc::new(Mutex::new(PoolState {
                running: 0,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Admit or reject synchronously. On rejection no state changes.
    pub fn try_acquire(&self) -> Result<Admission, QueueFull> {
        let mut state = self.inner.lock().expect("pool lock poisoned");
        if state.running + state.waiters.len() >= self.max_queue {
            return Err(QueueFull);
        }
        if state.running < self.max_concurrent && state.waiters.is_empty() {
            state.running += 1;
            return Ok(Admission::Ready(SlotGuard {
                inner: self.inner.clone(),
            }));
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Ok(Admission::Queued(SlotTicket {
            inner: self.inner.clone(),
            rx,
        }))
    }

    /// Admit and wait for a slot in one call.
    pub async fn acquire(&self) -> Result<SlotGuard, QueueFull> {
        match self.try_acquire()? {
            Admission::Ready(guard) => Ok(guard),
            Admission::Queued(ticket) => Ok(ticket.slot().await),
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.lock().expect("pool lock poisoned");
        QueueSnapshot {
            running: state.running,
            queued: state.waiters.len(),
            max_concurrent: self.max_concurrent,
            max_queue: self.max_queue,
        }
    }
}

fn release(inner: &Mutex<PoolState>) {
    let mut state = inner.lock().expect("pool lock poisoned");
    // Hand the slot to the first waiter that is still listening;
    // abandoned tickets (caller dropped while queued) are skipped.
    while let Some(tx) = state.waiters.pop_front() {
        if tx.send(()).is_ok() {
            return;
        }
    }
    state.running -= 1;
}

/// A queued admission. Awaiting it yields the slot once every earlier
/// admission has finished.
pub struct SlotTicket {
    inner: Arc<Mutex<PoolState>>,
    rx: oneshot::Receiver<()>,
}

impl SlotTicket {
    pub async fn slot(self) -> SlotGuard {
        // The ticket keeps the pool state alive, so the paired sender is
        // either pending in the queue or has already fired.
        self.rx.await.expect("slot pool dropped with live ticket");
        SlotGuard { inner: self.inner }
    }
}

/// An execution slot, released exactly once on drop, whether the job
/// succeeded, failed, timed out or panicked.
pub struct SlotGuard {
    inner: Arc<Mutex<PoolState>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        release(&self.inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_at_capacity_without_state_change() {
        let pool = SlotPool::new(1, 2);
        let _running = pool.acquire().await.unwrap();
        let _queued = match pool.try_acquire().unwrap() {
            Admission::Queued(ticket) => ticket,
            Admission::Ready(_) => panic!("slot should be busy"),
        };

        let before = pool.snapshot();
        assert!(pool.try_acquire().is_err());
        assert_eq!(pool.snapshot(), before);
        assert_eq!(before.running, 1);
        assert_eq!(before.queued, 1);
    }

    #[tokio::test]
    async fn slot_is_handed_to_head_waiter_in_fifo_order() {
        let pool = SlotPool::new(1, 10);
        let first = pool.acquire().await.unwrap();

        let mut tickets = Vec::new();
        for _ in 0..3 {
            match pool.try_acquire().unwrap() {
                Admission::Queued(ticket) => tickets.push(ticket),
                Admission::Ready(_) => panic!("slot should be busy"),
            }
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (i, ticket) in tickets.into_iter().enumerate() {
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let guard = ticket.slot().await;
                order.lock().unwrap().push(i);
                drop(guard);
            }));
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(pool.snapshot().running, 0);
    }

    #[tokio::test]
    async fn running_never_exceeds_max_concurrent() {
        let pool = SlotPool::new(2, 20);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let _guard = pool.acquire().await.unwrap();
                assert!(pool.snapshot().running <= 2);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(pool.snapshot().running, 0);
    }

    #[tokio::test]
    async fn abandoned_ticket_is_skipped_on_release() {
        let pool = SlotPool::new(1, 10);
        let first = pool.acquire().await.unwrap();

        let abandoned = pool.try_acquire().unwrap();
        let live = match pool.try_acquire().unwrap() {
            Admission::Queued(ticket) => ticket,
            Admission::Ready(_) => panic!("slot should be busy"),
        };
        drop(abandoned);

        drop(first);
        let _guard = live.slot().await;
        assert_eq!(pool.snapshot().running, 1);
        assert_eq!(pool.snapshot().queued, 0);
    }

    #[tokio::test]
    async fn guard_drop_releases_even_after_panic() {
        let pool = SlotPool::new(1, 5);
        let pool2 = pool.clone();
        let handle = tokio::spawn(async move {
            let _guard = pool2.acquire().await.unwrap();
            panic!("job blew up");
        });
        assert!(handle.await.is_err());
        assert_eq!(pool.snapshot().running, 0);
        // The slot is immediately reusable.
        let _guard = pool.acquire().await.unwrap();
    }
}
