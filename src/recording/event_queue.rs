// src/recording/event_queue.rs
//! Bounded FIFO queue between an instrumentation producer and a consumer
//!
//! Built on a crossbeam bounded channel so producers on arbitrary threads can
//! hand items to a single consumer. When the queue is full a producer either
//! blocks until the consumer catches up or drops the item and counts it,
//! depending on the configured [`BackpressurePolicy`].

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a producer does when the queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the consumer to make room
    Block,

    /// Discard the item and increment the drop counter
    Drop,
}

/// Why a push did not enqueue its item
#[derive(Debug)]
pub enum PushError<T> {
    /// Queue full under the drop policy
    Full(T),

    /// The consumer is gone
    Disconnected(T),

    /// No room before the deadline under the block policy
    Timeout(T),
}

impl<T> PushError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Disconnected(item) | PushError::Timeout(item) => item,
        }
    }
}

/// Result of a timed pop
#[derive(Debug)]
pub enum Pop<T> {
    Item(T),
    Timeout,
    Disconnected,
}

#[derive(Debug, Default)]
struct Counters {
    push_count: AtomicU64,
    pop_count: AtomicU64,
    drop_count: AtomicU64,
}

/// Create a bounded queue, returning its producer and consumer halves
pub fn bounded<T>(capacity: usize, policy: BackpressurePolicy) -> (QueueProducer<T>, QueueConsumer<T>) {
    let capacity = capacity.max(1);
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    let counters = Arc::new(Counters::default());

    (
        QueueProducer {
            tx,
            policy,
            capacity,
            counters: Arc::clone(&counters),
        },
        QueueConsumer {
            rx,
            capacity,
            counters,
        },
    )
}

/// Producer half; cheap to clone
pub struct QueueProducer<T> {
    tx: Sender<T>,
    policy: BackpressurePolicy,
    capacity: usize,
    counters: Arc<Counters>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            policy: self.policy,
            capacity: self.capacity,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl<T> QueueProducer<T> {
    /// Push an item according to the backpressure policy
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        match self.policy {
            BackpressurePolicy::Block => self.push_blocking(item),
            BackpressurePolicy::Drop => match self.tx.try_send(item) {
                Ok(()) => {
                    self.counters.push_count.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
                Err(TrySendError::Full(item)) => {
                    self.counters.drop_count.fetch_add(1, Ordering::Relaxed);
                    Err(PushError::Full(item))
                }
                Err(TrySendError::Disconnected(item)) => Err(PushError::Disconnected(item)),
            },
        }
    }

    /// Push an item, waiting for room regardless of the policy
    pub fn push_blocking(&self, item: T) -> Result<(), PushError<T>> {
        match self.tx.send(item) {
            Ok(()) => {
                self.counters.push_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => Err(PushError::Disconnected(err.into_inner())),
        }
    }

    /// Push according to the policy, but never wait past `deadline`
    pub fn push_until(&self, item: T, deadline: Instant) -> Result<(), PushError<T>> {
        if self.policy == BackpressurePolicy::Drop {
            return self.push(item);
        }
        match self.tx.send_deadline(item, deadline) {
            Ok(()) => {
                self.counters.push_count.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(item)) => {
                self.counters.drop_count.fetch_add(1, Ordering::Relaxed);
                Err(PushError::Timeout(item))
            }
            Err(SendTimeoutError::Disconnected(item)) => Err(PushError::Disconnected(item)),
        }
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    pub fn stats(&self) -> QueueStats {
        stats(&self.counters, self.tx.len(), self.capacity)
    }
}

/// Consumer half
pub struct QueueConsumer<T> {
    rx: Receiver<T>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl<T> QueueConsumer<T> {
    /// Block until an item arrives; `None` once every producer is gone
    pub fn pop(&self) -> Option<T> {
        let item = self.rx.recv().ok()?;
        self.counters.pop_count.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Block for at most `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> Pop<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => {
                self.counters.pop_count.fetch_add(1, Ordering::Relaxed);
                Pop::Item(item)
            }
            Err(RecvTimeoutError::Timeout) => Pop::Timeout,
            Err(RecvTimeoutError::Disconnected) => Pop::Disconnected,
        }
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<T> {
        let item = self.rx.try_recv().ok()?;
        self.counters.pop_count.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        stats(&self.counters, self.rx.len(), self.capacity)
    }
}

fn stats(counters: &Counters, current_size: usize, capacity: usize) -> QueueStats {
    QueueStats {
        push_count: counters.push_count.load(Ordering::Relaxed),
        pop_count: counters.pop_count.load(Ordering::Relaxed),
        drop_count: counters.drop_count.load(Ordering::Relaxed),
        current_size,
        capacity,
    }
}

/// Queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    /// Total items enqueued
    pub push_count: u64,

    /// Total items dequeued
    pub pop_count: u64,

    /// Total items dropped (queue full)
    pub drop_count: u64,

    /// Current queue size
    pub current_size: usize,

    /// Queue capacity
    pub capacity: usize,
}

impl QueueStats {
    pub fn fill_percentage(&self) -> f64 {
        (self.current_size as f64 / self.capacity as f64) * 100.0
    }

    /// Dropped items as a percentage of all offered items
    pub fn drop_rate(&self) -> f64 {
        let offered = self.push_count + self.drop_count;
        if offered == 0 {
            0.0
        } else {
            (self.drop_count as f64 / offered as f64) * 100.0
        }
    }
}
