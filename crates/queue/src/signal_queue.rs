//! Bounded, multi-producer multi-consumer signal queue.
//!
//! All mutation happens under one mutex; waiting producers and consumers
//! park on [`Notify`] outside the lock. Ordering (FIFO or priority) is
//! fixed at construction for the lifetime of the queue.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use reaper_core::config::{OverflowPolicy, QueueConfig};
use reaper_core::Signal;

use crate::error::QueueError;

/// Orders signals the way `sort_by` would: the smallest dequeues first.
pub type SignalComparator = Arc<dyn Fn(&Signal, &Signal) -> Ordering + Send + Sync>;

/// Result of a successful enqueue.
#[derive(Debug, PartialEq)]
pub enum Enqueued {
    Accepted,
    /// The queue was full under drop-oldest; this signal was evicted to
    /// make room and is handed back to the producer.
    Displaced(Signal),
}

#[derive(Clone)]
enum QueueOrder {
    Fifo,
    Priority(SignalComparator),
}

impl fmt::Debug for QueueOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueOrder::Fifo => f.write_str("fifo"),
            QueueOrder::Priority(_) => f.write_str("priority"),
        }
    }
}

struct Entry {
    seq: u64,
    signal: Signal,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<Entry>,
    next_seq: u64,
    closed: bool,
}

pub struct SignalQueue {
    inner: Mutex<Inner>,
    order: QueueOrder,
    capacity: usize,
    overflow: OverflowPolicy,
    enqueue_timeout: Duration,
    not_empty: Notify,
    not_full: Notify,
}

impl SignalQueue {
    /// FIFO queue.
    pub fn new(config: &QueueConfig) -> Self {
        Self::build(config, QueueOrder::Fifo)
    }

    /// Priority queue ordered by `comparator`; equal signals keep arrival order.
    pub fn with_priority<F>(config: &QueueConfig, comparator: F) -> Self
    where
        F: Fn(&Signal, &Signal) -> Ordering + Send + Sync + 'static,
    {
        Self::build(config, QueueOrder::Priority(Arc::new(comparator)))
    }

    fn build(config: &QueueConfig, order: QueueOrder) -> Self {
        let capacity = config.capacity.max(1);
        debug!(capacity, overflow = %config.overflow, ?order, "signal queue created");
        Self {
            inner: Mutex::new(Inner::default()),
            order,
            capacity,
            overflow: config.overflow,
            enqueue_timeout: config.enqueue_timeout,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a signal, applying the overflow policy when full.
    ///
    /// Only [`OverflowPolicy::Block`] ever waits, for at most the
    /// configured enqueue timeout.
    pub async fn enqueue(&self, signal: Signal) -> Result<Enqueued, QueueError> {
        if self.overflow != OverflowPolicy::Block {
            return self.try_enqueue(signal);
        }

        let deadline = Instant::now() + self.enqueue_timeout;
        loop {
            let mut notified = pin!(self.not_full.notified());
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(QueueError::Closed);
                }
                if inner.entries.len() < self.capacity {
                    self.insert(&mut inner, signal);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(Enqueued::Accepted);
                }
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::Backpressure {
                    capacity: self.capacity,
                });
            }
        }
    }

    /// Non-waiting enqueue. Under the block policy a full queue fails
    /// immediately with backpressure.
    pub fn try_enqueue(&self, signal: Signal) -> Result<Enqueued, QueueError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(QueueError::Closed);
        }

        let mut outcome = Enqueued::Accepted;
        if inner.entries.len() >= self.capacity {
            match self.overflow {
                OverflowPolicy::Reject | OverflowPolicy::Block => {
                    return Err(QueueError::Backpressure {
                        capacity: self.capacity,
                    });
                }
                OverflowPolicy::DropOldest => {
                    if let Some(evicted) = Self::evict_oldest(&mut inner) {
                        warn!(
                            signal_id = %evicted.id(),
                            capacity = self.capacity,
                            "queue full, dropped oldest signal"
                        );
                        outcome = Enqueued::Displaced(evicted);
                    }
                }
            }
        }

        self.insert(&mut inner, signal);
        drop(inner);
        self.not_empty.notify_one();
        Ok(outcome)
    }

    fn insert(&self, inner: &mut Inner, signal: Signal) {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = Entry { seq, signal };
        match &self.order {
            QueueOrder::Fifo => inner.entries.push_back(entry),
            QueueOrder::Priority(cmp) => {
                // First position whose signal sorts strictly after the new one.
                let pos = inner
                    .entries
                    .iter()
                    .position(|e| cmp(&entry.signal, &e.signal) == Ordering::Less)
                    .unwrap_or(inner.entries.len());
                inner.entries.insert(pos, entry);
            }
        }
    }

    /// Remove the signal that has waited longest, regardless of ordering.
    fn evict_oldest(inner: &mut Inner) -> Option<Signal> {
        let idx = inner
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.seq)
            .map(|(i, _)| i)?;
        inner.entries.remove(idx).map(|e| e.signal)
    }

    /// Wait up to `timeout` for the next signal.
    ///
    /// A closed queue still drains; `Closed` is returned only once it is
    /// both closed and empty.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Signal, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut notified = pin!(self.not_empty.notified());
            notified.as_mut().enable();
            match self.try_dequeue() {
                Ok(signal) => return Ok(signal),
                Err(QueueError::Timeout) => {}
                Err(e) => return Err(e),
            }
            if timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::Timeout);
            }
        }
    }

    /// Pop the next signal without waiting. An empty open queue reports
    /// `Timeout`.
    pub fn try_dequeue(&self) -> Result<Signal, QueueError> {
        let mut inner = self.lock();
        match inner.entries.pop_front() {
            Some(entry) => {
                let more = !inner.entries.is_empty();
                drop(inner);
                self.not_full.notify_one();
                if more {
                    // Pass the wakeup on so a second consumer is not stranded.
                    self.not_empty.notify_one();
                }
                Ok(entry.signal)
            }
            None if inner.closed => Err(QueueError::Closed),
            None => Err(QueueError::Timeout),
        }
    }

    /// Pop up to `max` signals at once, in dequeue order.
    pub fn drain_up_to(&self, max: usize) -> Vec<Signal> {
        let mut inner = self.lock();
        let n = max.min(inner.entries.len());
        let drained: Vec<Signal> = inner.entries.drain(..n).map(|e| e.signal).collect();
        drop(inner);
        if !drained.is_empty() {
            self.not_full.notify_waiters();
        }
        drained
    }

    /// Clone of the signal that would dequeue next.
    pub fn peek(&self) -> Option<Signal> {
        self.lock().entries.front().map(|e| e.signal.clone())
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn is_priority(&self) -> bool {
        matches!(self.order, QueueOrder::Priority(_))
    }

    /// Remove everything; returns how many signals were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let removed = inner.entries.len();
        inner.entries.clear();
        drop(inner);
        if removed > 0 {
            debug!(removed, "queue cleared");
            self.not_full.notify_waiters();
        }
        removed
    }

    /// Refuse new signals and wake every waiter. Queued signals still drain.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        debug!("queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl fmt::Debug for SignalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalQueue")
            .field("order", &self.order)
            .field("capacity", &self.capacity)
            .field("overflow", &self.overflow)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reaper_core::SenseType;
    use serde_json::json;

    fn config(capacity: usize, overflow: OverflowPolicy) -> QueueConfig {
        QueueConfig {
            capacity,
            overflow,
            enqueue_timeout: Duration::from_millis(200),
        }
    }

    fn sig(n: i64) -> Signal {
        Signal::new(SenseType::Sight, "feed-A")
            .unwrap()
            .with_field("n", json!(n))
    }

    fn n(signal: &Signal) -> i64 {
        signal.raw_data()["n"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn fifo_round_trip() {
        let queue = SignalQueue::new(&config(10, OverflowPolicy::Reject));
        for i in 0..5 {
            queue.enqueue(sig(i)).await.unwrap();
        }
        let mut out = Vec::new();
        for _ in 0..5 {
            out.push(n(&queue.dequeue(Duration::from_millis(10)).await.unwrap()));
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn reject_leaves_size_unchanged() {
        let queue = SignalQueue::new(&config(2, OverflowPolicy::Reject));
        queue.enqueue(sig(1)).await.unwrap();
        queue.enqueue(sig(2)).await.unwrap();
        let err = queue.enqueue(sig(3)).await.unwrap_err();
        assert_eq!(err, QueueError::Backpressure { capacity: 2 });
        assert_eq!(queue.size(), 2);
        assert_eq!(n(&queue.peek().unwrap()), 1);
    }

    #[tokio::test]
    async fn drop_oldest_hands_back_evicted_signal() {
        let queue = SignalQueue::new(&config(2, OverflowPolicy::DropOldest));
        queue.enqueue(sig(1)).await.unwrap();
        queue.enqueue(sig(2)).await.unwrap();
        match queue.enqueue(sig(3)).await.unwrap() {
            Enqueued::Displaced(evicted) => assert_eq!(n(&evicted), 1),
            other => panic!("expected displacement, got {other:?}"),
        }
        assert_eq!(queue.size(), 2);
        assert_eq!(n(&queue.try_dequeue().unwrap()), 2);
        assert_eq!(n(&queue.try_dequeue().unwrap()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn block_times_out_with_backpressure() {
        let queue = SignalQueue::new(&config(1, OverflowPolicy::Block));
        queue.enqueue(sig(1)).await.unwrap();
        let err = queue.enqueue(sig(2)).await.unwrap_err();
        assert_eq!(err, QueueError::Backpressure { capacity: 1 });
        assert_eq!(queue.size(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_resumes_when_space_frees() {
        let queue = Arc::new(SignalQueue::new(&config(1, OverflowPolicy::Block)));
        queue.enqueue(sig(1)).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(sig(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(n(&queue.try_dequeue().unwrap()), 1);

        assert_eq!(producer.await.unwrap().unwrap(), Enqueued::Accepted);
        assert_eq!(n(&queue.try_dequeue().unwrap()), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_on_empty_queue() {
        let queue = SignalQueue::new(&config(4, OverflowPolicy::Reject));
        assert_eq!(
            queue.dequeue(Duration::from_secs(1)).await.unwrap_err(),
            QueueError::Timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_consumer_wakes_on_enqueue() {
        let queue = Arc::new(SignalQueue::new(&config(4, OverflowPolicy::Reject)));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(sig(7)).await.unwrap();
        assert_eq!(n(&consumer.await.unwrap().unwrap()), 7);
    }

    #[tokio::test]
    async fn priority_orders_by_comparator_with_stable_ties() {
        // Higher `n` first.
        let queue = SignalQueue::with_priority(&config(10, OverflowPolicy::Reject), |a, b| {
            n(b).cmp(&n(a))
        });
        for (i, value) in [1, 5, 3, 5, 2].into_iter().enumerate() {
            let s = sig(value).with_field("arrival", json!(i));
            queue.enqueue(s).await.unwrap();
        }
        let order: Vec<(i64, u64)> = std::iter::from_fn(|| queue.try_dequeue().ok())
            .map(|s| (n(&s), s.raw_data()["arrival"].as_u64().unwrap()))
            .collect();
        assert_eq!(order, vec![(5, 1), (5, 3), (3, 2), (2, 4), (1, 0)]);
    }

    #[tokio::test]
    async fn priority_drop_oldest_evicts_by_arrival() {
        let queue = SignalQueue::with_priority(&config(2, OverflowPolicy::DropOldest), |a, b| {
            n(b).cmp(&n(a))
        });
        queue.enqueue(sig(9)).await.unwrap();
        queue.enqueue(sig(1)).await.unwrap();
        match queue.enqueue(sig(5)).await.unwrap() {
            Enqueued::Displaced(evicted) => assert_eq!(n(&evicted), 9),
            other => panic!("expected displacement, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_drains_then_reports_closed() {
        let queue = SignalQueue::new(&config(4, OverflowPolicy::Reject));
        queue.enqueue(sig(1)).await.unwrap();
        queue.close();
        assert_eq!(queue.enqueue(sig(2)).await.unwrap_err(), QueueError::Closed);
        assert_eq!(n(&queue.dequeue(Duration::from_millis(5)).await.unwrap()), 1);
        assert_eq!(
            queue.dequeue(Duration::from_millis(5)).await.unwrap_err(),
            QueueError::Closed
        );
    }

    #[tokio::test]
    async fn clear_and_drain() {
        let queue = SignalQueue::new(&config(10, OverflowPolicy::Reject));
        for i in 0..6 {
            queue.enqueue(sig(i)).await.unwrap();
        }
        let drained: Vec<i64> = queue.drain_up_to(2).iter().map(n).collect();
        assert_eq!(drained, vec![0, 1]);
        assert_eq!(queue.clear(), 4);
        assert!(queue.peek().is_none());
        assert_eq!(queue.clear(), 0);
    }

    #[tokio::test]
    async fn concurrent_producers_never_exceed_capacity() {
        let queue = Arc::new(SignalQueue::new(&config(50, OverflowPolicy::Reject)));
        let mut handles = Vec::new();
        for p in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut accepted = 0;
                for i in 0..25 {
                    if queue.enqueue(sig(p * 100 + i)).await.is_ok() {
                        accepted += 1;
                    }
                }
                accepted
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 50);
        assert_eq!(queue.size(), 50);
    }
}
