// Copyright (c) The testsched Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fixed-capacity blocking queue for passing results between threads.

use std::{
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

type Callback = Box<dyn Fn() + Send + Sync>;

/// A thread-safe FIFO queue with a fixed capacity.
///
/// [`enqueue`](Self::enqueue) blocks while the queue is full, and [`dequeue`](Self::dequeue)
/// blocks while it is empty. The queue is backed by a circular buffer guarded by a single mutex,
/// with separate condition variables for "not full" and "not empty".
pub struct BoundedBlockingQueue<T> {
    state: Mutex<RingState<T>>,
    not_full: Condvar,
    not_empty: Condvar,
    on_full: Option<Callback>,
    on_space_available: Option<Callback>,
}

struct RingState<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    len: usize,
    // Set when the queue became full and cleared when space next becomes available, so the
    // callbacks fire once per transition.
    is_full: bool,
}

impl<T> RingState<T> {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn push(&mut self, item: T) {
        let tail = (self.head + self.len) % self.capacity();
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.head].take();
        self.head = (self.head + 1) % self.capacity();
        self.len -= 1;
        item
    }
}

impl<T> BoundedBlockingQueue<T> {
    /// Creates a new queue holding at most `capacity` items. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                len: 0,
                is_full: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            on_full: None,
            on_space_available: None,
        }
    }

    /// Sets a callback invoked when the queue becomes full.
    pub fn on_full(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_full = Some(Box::new(callback));
        self
    }

    /// Sets a callback invoked when a full queue next has space available.
    ///
    /// This callback runs with the queue locked, and must not access the queue.
    pub fn on_space_available(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_space_available = Some(Box::new(callback));
        self
    }

    /// Returns the capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Returns the number of items currently in the queue.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds an item to the back of the queue, blocking while the queue is full.
    pub fn enqueue(&self, item: T) {
        let mut state = self.lock();
        while state.len == state.capacity() {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.push(item);
        let became_full = state.len == state.capacity() && !state.is_full;
        if became_full {
            state.is_full = true;
        }
        drop(state);

        if became_full && let Some(on_full) = &self.on_full {
            on_full();
        }
        self.not_empty.notify_one();
    }

    /// Removes the item at the front of the queue, blocking while the queue is empty.
    pub fn dequeue(&self) -> T {
        let mut state = self.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut state) {
                return item;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Removes the item at the front of the queue, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` if the queue was still empty when the timeout elapsed.
    pub fn try_dequeue(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(item) = self.pop_locked(&mut state) {
                return Some(item);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            state = self
                .not_empty
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn pop_locked(&self, state: &mut MutexGuard<'_, RingState<T>>) -> Option<T> {
        let item = state.pop()?;
        let space_available = state.is_full;
        state.is_full = false;

        if space_available && let Some(on_space_available) = &self.on_space_available {
            on_space_available();
        }
        self.not_full.notify_one();
        Some(item)
    }

    fn lock(&self) -> MutexGuard<'_, RingState<T>> {
        // A panic while holding the lock can't leave the ring inconsistent: push and pop only
        // mutate it after their last fallible step.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for BoundedBlockingQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("BoundedBlockingQueue")
            .field("capacity", &state.capacity())
            .field("len", &state.len)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };
    use test_strategy::proptest;

    #[test]
    fn fifo_within_capacity() {
        let queue = BoundedBlockingQueue::new(8);
        for i in 0..8 {
            queue.enqueue(i);
        }
        assert_eq!(queue.len(), 8);
        let items: Vec<_> = (0..8).map(|_| queue.dequeue()).collect();
        assert_eq!(items, (0..8).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn try_dequeue_times_out() {
        let queue = BoundedBlockingQueue::<u32>::new(2);
        let start = Instant::now();
        assert_eq!(queue.try_dequeue(Duration::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn zero_capacity_is_one() {
        let queue = BoundedBlockingQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.enqueue("x");
        assert_eq!(queue.try_dequeue(Duration::ZERO), Some("x"));
    }

    #[test]
    fn callbacks_fire_once_per_transition() {
        let full = Arc::new(AtomicUsize::new(0));
        let space = Arc::new(AtomicUsize::new(0));
        let queue = BoundedBlockingQueue::new(2)
            .on_full({
                let full = full.clone();
                move || {
                    full.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_space_available({
                let space = space.clone();
                move || {
                    space.fetch_add(1, Ordering::SeqCst);
                }
            });

        queue.enqueue(1);
        queue.enqueue(2);
        queue.dequeue();
        queue.dequeue();
        queue.enqueue(3);
        queue.enqueue(4);
        queue.dequeue();

        assert_eq!(full.load(Ordering::SeqCst), 2);
        assert_eq!(space.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn many_producers_one_consumer() {
        let queue = Arc::new(BoundedBlockingQueue::new(4));
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(p * 1000 + i);
                    }
                })
            })
            .collect();

        let mut received: Vec<_> = (0..1000).map(|_| queue.dequeue()).collect();
        for producer in producers {
            producer.join().unwrap();
        }

        // Each producer's items arrive in the order they were sent.
        for p in 0..4 {
            let from_p: Vec<_> = received.iter().copied().filter(|v| v / 1000 == p).collect();
            assert_eq!(from_p, (0..250).map(|i| p * 1000 + i).collect::<Vec<_>>());
        }
        received.sort_unstable();
        received.dedup();
        assert_eq!(received.len(), 1000);
    }

    #[proptest(cases = 32)]
    fn fifo_beyond_capacity(
        #[strategy(1usize..16)] capacity: usize,
        #[strategy(0usize..64)] count: usize,
    ) {
        let queue = Arc::new(BoundedBlockingQueue::new(capacity));
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for i in 0..count {
                    queue.enqueue(i);
                }
            })
        };
        let items: Vec<_> = (0..count).map(|_| queue.dequeue()).collect();
        producer.join().unwrap();
        assert_eq!(items, (0..count).collect::<Vec<_>>());
    }
}
