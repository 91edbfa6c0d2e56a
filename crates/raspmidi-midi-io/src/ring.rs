//! Bounded, sequence-numbered history buffer.

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Keeps the newest `capacity` entries; pushing into a full buffer drops the
/// oldest. Every entry gets a monotonically increasing sequence number so
/// pollers can ask for "everything after N" without losing their place when
/// old entries fall off.
pub struct SequencedRing<T> {
    rb: HeapRb<(u64, T)>,
    capacity: usize,
    next_seq: u64,
}

impl<T: Clone> SequencedRing<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            rb: HeapRb::new(capacity),
            capacity,
            next_seq: 1,
        }
    }

    /// Appends the value built from its sequence number.
    pub fn push_with(&mut self, make: impl FnOnce(u64) -> T) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rb.push_overwrite((seq, make(seq)));
        seq
    }

    /// Like [`push_with`](Self::push_with), returning a copy of the entry.
    pub fn push_and_get(&mut self, make: impl FnOnce(u64) -> T) -> T {
        let seq = self.next_seq;
        self.next_seq += 1;
        let item = make(seq);
        self.rb.push_overwrite((seq, item.clone()));
        item
    }

    /// Entries with a sequence number greater than `cursor`, oldest first.
    pub fn since(&self, cursor: u64) -> Vec<T> {
        self.rb
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn last(&self) -> Option<T> {
        self.rb.iter().last().map(|(_, item)| item.clone())
    }

    /// Sequence number of the newest entry ever pushed (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn len(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry. Sequence numbers keep counting.
    pub fn clear(&mut self) -> usize {
        let cleared = self.len();
        self.rb = HeapRb::new(self.capacity);
        cleared
    }
}
