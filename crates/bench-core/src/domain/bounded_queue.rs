//! Drop-oldest bounded FIFO.
//!
//! Telemetry is continuously refreshed, so a consumer only ever needs the most
//! recent window.  Once the queue is full, pushing a new element evicts the
//! oldest one and hands it back to the caller, which logs it as an overflow.

use std::collections::VecDeque;

/// A FIFO holding at most `capacity` elements.
#[derive(Debug, Clone)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue.  A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item`, returning the evicted oldest element if the queue was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Removes and returns the oldest element.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Discards every element and returns how many were dropped.
    pub fn purge(&mut self) -> usize {
        let count = self.items.len();
        self.items.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates oldest-first without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_below_capacity_evicts_nothing() {
        let mut q = BoundedQueue::new(3);
        assert_eq!(q.push(1), None);
        assert_eq!(q.push(2), None);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_push_at_capacity_evicts_oldest() {
        // Arrange
        let mut q = BoundedQueue::new(3);
        for i in 0..3 {
            q.push(i);
        }

        // Act
        let evicted = q.push(3);

        // Assert
        assert_eq!(evicted, Some(0));
        assert_eq!(q.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_many_pushes_keep_most_recent_window() {
        let mut q = BoundedQueue::new(50);
        for i in 0..120 {
            q.push(i);
        }
        let kept: Vec<i32> = q.iter().copied().collect();
        assert_eq!(kept, (70..120).collect::<Vec<_>>());
    }

    #[test]
    fn test_purge_reports_dropped_count() {
        let mut q = BoundedQueue::new(4);
        q.push('a');
        q.push('b');
        assert_eq!(q.purge(), 2);
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut q = BoundedQueue::new(0);
        assert_eq!(q.capacity(), 1);
        q.push(1);
        assert_eq!(q.push(2), Some(1));
    }
}
