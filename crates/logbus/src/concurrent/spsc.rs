// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-producer single-consumer command queue.
//!
//! Lock-free ring used for conductor -> sender and conductor -> receiver
//! commands. Fixed capacity; a failed offer is retried on the next duty
//! cycle by the owning proxy.
//!
//! Protocol:
//! - Producer: offer() writes the slot, then advances head (release)
//! - Consumer: poll() reads head (acquire), takes the slot, advances tail
//! - Full: (head + 1) & mask == tail
//! - Empty: head == tail

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer, single-consumer queue of owned commands.
///
/// SAFETY contract: exactly ONE thread calls [`OneToOneQueue::offer`] and
/// exactly ONE thread calls [`OneToOneQueue::poll`]/[`OneToOneQueue::drain`].
pub struct OneToOneQueue<T> {
    slots: UnsafeCell<Vec<Option<T>>>,
    capacity_mask: usize,

    /// Producer cursor
    head: AtomicUsize,
    /// Consumer cursor
    tail: AtomicUsize,
}

// SAFETY: slots are protected by the SPSC head/tail protocol; a slot is
// written only by the producer before the head release-store and read only
// by the consumer after the matching acquire-load.
unsafe impl<T: Send> Send for OneToOneQueue<T> {}
unsafe impl<T: Send> Sync for OneToOneQueue<T> {}

impl<T> OneToOneQueue<T> {
    /// Create a queue with capacity rounded up to the next power of two.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        let capacity = capacity.next_power_of_two();

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            slots: UnsafeCell::new(slots),
            capacity_mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Offer a command (non-blocking).
    ///
    /// # Errors
    ///
    /// Returns the command back when the queue is full so the caller can
    /// retry it later.
    pub fn offer(&self, item: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let next_head = (head + 1) & self.capacity_mask;

        if next_head == self.tail.load(Ordering::Acquire) {
            return Err(item); // full
        }

        // SAFETY: SPSC protocol - only the producer writes the head slot,
        // and the consumer will not read it until the release below.
        unsafe {
            (&mut (*self.slots.get()))[head] = Some(item);
        }

        self.head.store(next_head, Ordering::Release);
        Ok(())
    }

    /// Poll one command (non-blocking).
    pub fn poll(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None; // empty
        }

        // SAFETY: SPSC protocol - only the consumer touches the tail slot,
        // and the producer published it with the head release-store.
        let item = unsafe { (&mut (*self.slots.get()))[tail].take() };

        self.tail.store((tail + 1) & self.capacity_mask, Ordering::Release);
        item
    }

    /// Drain up to `limit` commands into `f`, returning the count drained.
    pub fn drain<F: FnMut(T)>(&self, limit: usize, mut f: F) -> usize {
        let mut count = 0;
        while count < limit {
            match self.poll() {
                Some(item) => {
                    f(item);
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Approximate number of queued commands (racy, for monitoring).
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        head.wrapping_sub(tail) & self.capacity_mask
    }

    /// Is the queue empty (racy, for monitoring)?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_offer_poll_basic() {
        let q = OneToOneQueue::with_capacity(8);
        assert!(q.offer(41).is_ok());
        assert!(q.offer(42).is_ok());
        assert_eq!(q.poll(), Some(41));
        assert_eq!(q.poll(), Some(42));
        assert_eq!(q.poll(), None);
    }

    #[test]
    fn test_full_queue_returns_item() {
        let q = OneToOneQueue::with_capacity(4); // one slot reserved

        assert!(q.offer(1).is_ok());
        assert!(q.offer(2).is_ok());
        assert!(q.offer(3).is_ok());
        assert_eq!(q.offer(4), Err(4));
    }

    #[test]
    fn test_drain_respects_limit() {
        let q = OneToOneQueue::with_capacity(16);
        for i in 0..10 {
            q.offer(i).expect("queue has room");
        }

        let mut seen = Vec::new();
        let drained = q.drain(4, |v| seen.push(v));
        assert_eq!(drained, 4);
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(q.len(), 6);
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let q = OneToOneQueue::with_capacity(4);

        for round in 0..10 {
            assert!(q.offer(round * 2).is_ok());
            assert!(q.offer(round * 2 + 1).is_ok());
            assert_eq!(q.poll(), Some(round * 2));
            assert_eq!(q.poll(), Some(round * 2 + 1));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_cross_thread_handoff() {
        let q = Arc::new(OneToOneQueue::with_capacity(64));
        let producer_q = Arc::clone(&q);

        let producer = thread::spawn(move || {
            for i in 0..1000u64 {
                loop {
                    if producer_q.offer(i).is_ok() {
                        break;
                    }
                    std::hint::spin_loop();
                }
            }
        });

        let mut expected = 0u64;
        while expected < 1000 {
            if let Some(v) = q.poll() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }

        producer.join().expect("producer thread");
    }
}
