//! Fixed-capacity ring of price samples per instrument.

use crate::types::PricePoint;
use std::collections::VecDeque;

/// Default number of samples retained per instrument.
pub const DEFAULT_CAPACITY: usize = 50;

/// Append-only FIFO of `(timestamp, price)` samples. Once full, each push
/// evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct PriceHistoryBuffer {
    samples: VecDeque<PricePoint>,
    capacity: usize,
}

impl PriceHistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest beyond capacity.
    pub fn push(&mut self, time: i64, price: f64) {
        self.samples.push_back(PricePoint { time, price });
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<PricePoint> {
        self.samples.back().copied()
    }

    pub fn oldest(&self) -> Option<PricePoint> {
        self.samples.front().copied()
    }

    /// Highest and lowest price currently held.
    pub fn range(&self) -> Option<(f64, f64)> {
        let mut iter = self.samples.iter();
        let first = iter.next()?.price;
        Some(iter.fold((first, first), |(high, low), p| {
            (high.max(p.price), low.min(p.price))
        }))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PricePoint> {
        self.samples.iter()
    }

    /// Samples in time order, oldest first.
    pub fn to_vec(&self) -> Vec<PricePoint> {
        self.samples.iter().copied().collect()
    }
}

impl Default for PriceHistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_below_capacity() {
        let mut buffer = PriceHistoryBuffer::new(3);
        buffer.push(1, 10.0);
        buffer.push(2, 11.0);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.oldest().unwrap().time, 1);
        assert_eq!(buffer.latest().unwrap().price, 11.0);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut buffer = PriceHistoryBuffer::new(3);
        for i in 0..5 {
            buffer.push(i, i as f64);
        }
        let times: Vec<i64> = buffer.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn test_default_capacity_never_exceeded() {
        let mut buffer = PriceHistoryBuffer::default();
        for i in 0..500 {
            buffer.push(i, 100.0 + i as f64);
            assert!(buffer.len() <= DEFAULT_CAPACITY);
        }
        assert_eq!(buffer.len(), DEFAULT_CAPACITY);
        assert_eq!(buffer.oldest().unwrap().time, 450);
        assert_eq!(buffer.latest().unwrap().time, 499);
    }

    #[test]
    fn test_range() {
        let mut buffer = PriceHistoryBuffer::new(10);
        assert!(buffer.range().is_none());
        buffer.push(1, 5.0);
        buffer.push(2, 9.0);
        buffer.push(3, 2.0);
        assert_eq!(buffer.range(), Some((9.0, 2.0)));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut buffer = PriceHistoryBuffer::new(0);
        buffer.push(1, 1.0);
        buffer.push(2, 2.0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_vec(), vec![PricePoint { time: 2, price: 2.0 }]);
    }
}
