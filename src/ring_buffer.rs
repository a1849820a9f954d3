//! Per-source bounded event store (spec.md §4.1, C1).
//!
//! Single-writer/multi-reader circular buffer: `add()` never blocks and
//! never allocates once constructed, `tail(n)` returns the most recent `n`
//! events without disturbing older readers. Implemented with a fixed
//! `Vec<RwLock<Option<Event>>>` slot array plus an atomic monotonic write
//! counter rather than raw unsafe pointer tricks — see DESIGN.md for why a
//! genuinely-lock-free version was rejected for this crate.

use crate::event::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Fixed-capacity circular store of the most recent events for one source.
pub struct RingBuffer {
    slots: Vec<RwLock<Option<Event>>>,
    capacity: u64,
    /// Total events ever written; `write_count % capacity` is the next slot.
    write_count: AtomicU64,
    dropped: AtomicU64,
}

impl RingBuffer {
    /// `requested_capacity` is rounded up to the next power of two, matching
    /// the buffer-sizing note in spec.md §4.1.
    pub fn new(requested_capacity: usize) -> Self {
        let capacity = requested_capacity.max(1).next_power_of_two() as u64;
        let mut slots = Vec::with_capacity(capacity as usize);
        slots.resize_with(capacity as usize, || RwLock::new(None));
        Self {
            slots,
            capacity,
            write_count: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Append an event, overwriting the oldest slot once the buffer is full.
    pub fn add(&self, event: Event) {
        let idx = self.write_count.fetch_add(1, Ordering::AcqRel) % self.capacity;
        let mut slot = self.slots[idx as usize]
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        *slot = Some(event);
    }

    /// The most recently written events, oldest first, newest last, capped
    /// at `n` and at however many have actually been written.
    pub fn tail(&self, n: usize) -> Vec<Event> {
        let written = self.write_count.load(Ordering::Acquire);
        let available = written.min(self.capacity) as usize;
        let take = n.min(available);
        let mut out = Vec::with_capacity(take);
        for back in (0..take).rev() {
            let logical = written - 1 - back as u64;
            let idx = (logical % self.capacity) as usize;
            if let Ok(slot) = self.slots[idx].read() {
                if let Some(event) = slot.as_ref() {
                    out.push(event.clone());
                }
            }
        }
        out
    }

    pub fn total_written(&self) -> u64 {
        self.write_count.load(Ordering::Acquire)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_capacity_up_to_power_of_two() {
        let rb = RingBuffer::new(100);
        assert_eq!(rb.capacity(), 128);
    }

    #[test]
    fn tail_returns_oldest_first_newest_last() {
        let rb = RingBuffer::new(4);
        for i in 0..4 {
            rb.add(Event::from_raw(format!("msg-{i}")));
        }
        let tail = rb.tail(4);
        let raws: Vec<&str> = tail.iter().map(Event::raw).collect();
        assert_eq!(raws, vec!["msg-0", "msg-1", "msg-2", "msg-3"]);
    }

    #[test]
    fn overflow_drops_oldest_and_tracks_count() {
        let rb = RingBuffer::new(4);
        for i in 0..6 {
            rb.add(Event::from_raw(format!("msg-{i}")));
        }
        assert_eq!(rb.dropped(), 2);
        let tail = rb.tail(10);
        let raws: Vec<&str> = tail.iter().map(Event::raw).collect();
        assert_eq!(raws, vec!["msg-2", "msg-3", "msg-4", "msg-5"]);
    }

    #[test]
    fn tail_partial_before_full() {
        let rb = RingBuffer::new(8);
        rb.add(Event::from_raw("only-one"));
        let tail = rb.tail(8);
        assert_eq!(tail.len(), 1);
    }
}
