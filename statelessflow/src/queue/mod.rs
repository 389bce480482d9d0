//! Bounded FIFO queues between stages.
//!
//! A queue rejects offers once it holds `capacity` records, handing the record
//! back to the producer. Producers keep rejected records and retry on a later
//! invocation, which is how a slow consumer pushes back on its upstream without
//! blocking the scheduler.

use crate::core::FlowRecord;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Counters describing queue traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Records accepted.
    pub accepted: u64,
    /// Offers rejected because the queue was full.
    pub rejected: u64,
    /// Records handed to the consumer.
    pub delivered: u64,
    /// Highest number of records held at once.
    pub high_water_mark: usize,
}

/// An ordered holding area of flow records with a capacity bound.
#[derive(Debug, Default)]
pub struct BoundedQueue {
    records: VecDeque<FlowRecord>,
    /// Maximum records held; 0 means unbounded.
    capacity: usize,
    stats: QueueStats,
}

impl BoundedQueue {
    /// Creates a queue holding at most `capacity` records.
    ///
    /// A capacity of 0 creates an unbounded queue.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
            stats: QueueStats::default(),
        }
    }

    /// Creates an unbounded queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Returns the capacity bound (0 = unbounded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if the queue has no bound.
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.capacity == 0
    }

    /// Returns the number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the queue holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns true if at least one more record would be accepted.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.is_unbounded() || self.records.len() < self.capacity
    }

    /// Returns how many more records would be accepted, `None` when unbounded.
    #[must_use]
    pub fn remaining_capacity(&self) -> Option<usize> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.capacity.saturating_sub(self.records.len()))
        }
    }

    /// Offers a record to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns the record unchanged when the queue is full.
    pub fn offer(&mut self, record: FlowRecord) -> Result<(), FlowRecord> {
        if !self.has_capacity() {
            self.stats.rejected += 1;
            return Err(record);
        }

        self.records.push_back(record);
        self.stats.accepted += 1;
        self.stats.high_water_mark = self.stats.high_water_mark.max(self.records.len());
        Ok(())
    }

    /// Takes the record at the front of the queue.
    pub fn poll(&mut self) -> Option<FlowRecord> {
        let record = self.records.pop_front()?;
        self.stats.delivered += 1;
        Some(record)
    }

    /// Takes up to `max` records from the front of the queue, oldest first.
    pub fn poll_batch(&mut self, max: usize) -> Vec<FlowRecord> {
        let take = max.min(self.records.len());
        let batch: Vec<FlowRecord> = self.records.drain(..take).collect();
        self.stats.delivered += batch.len() as u64;
        batch
    }

    /// Returns the record at the front without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&FlowRecord> {
        self.records.front()
    }

    /// Removes and returns every queued record, oldest first.
    pub fn drain(&mut self) -> Vec<FlowRecord> {
        let all: Vec<FlowRecord> = self.records.drain(..).collect();
        self.stats.delivered += all.len() as u64;
        all
    }

    /// Drops every queued record, returning how many were dropped.
    ///
    /// Dropped records are not counted as delivered.
    pub fn abandon(&mut self) -> usize {
        let count = self.records.len();
        self.records.clear();
        count
    }

    /// Returns the traffic counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(text: &str) -> FlowRecord {
        FlowRecord::from_text(text.to_string())
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = BoundedQueue::new(10);
        for text in ["a", "b", "c"] {
            queue.offer(record(text)).unwrap();
        }

        let texts: Vec<String> = queue.poll_batch(10).iter().map(FlowRecord::content_text).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_offer_rejected_at_capacity() {
        let mut queue = BoundedQueue::new(2);
        queue.offer(record("1")).unwrap();
        queue.offer(record("2")).unwrap();

        let rejected = queue.offer(record("3")).unwrap_err();
        assert_eq!(rejected.content_text(), "3");
        assert_eq!(queue.len(), 2);
        assert!(!queue.has_capacity());
        assert_eq!(queue.remaining_capacity(), Some(0));
        assert_eq!(queue.stats().rejected, 1);

        queue.poll().unwrap();
        assert!(queue.has_capacity());
        queue.offer(rejected).unwrap();
        assert_eq!(queue.peek().unwrap().content_text(), "2");
    }

    #[test]
    fn test_unbounded_never_rejects() {
        let mut queue = BoundedQueue::unbounded();
        for i in 0..1_000 {
            queue.offer(record(&i.to_string())).unwrap();
        }

        assert!(queue.is_unbounded());
        assert!(queue.has_capacity());
        assert_eq!(queue.remaining_capacity(), None);
        assert_eq!(queue.stats().high_water_mark, 1_000);
    }

    #[test]
    fn test_poll_batch_respects_max() {
        let mut queue = BoundedQueue::new(0);
        for text in ["a", "b", "c"] {
            queue.offer(record(text)).unwrap();
        }

        assert_eq!(queue.poll_batch(2).len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.stats().delivered, 2);
    }

    #[test]
    fn test_abandon_is_not_delivery() {
        let mut queue = BoundedQueue::new(5);
        queue.offer(record("a")).unwrap();
        queue.offer(record("b")).unwrap();

        assert_eq!(queue.abandon(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.stats().delivered, 0);
        assert_eq!(queue.stats().accepted, 2);
    }
}
