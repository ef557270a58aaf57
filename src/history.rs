//! Sample history
//!
//! Fixed-capacity, arrival-ordered buffer of recent samples. The oldest
//! entry is evicted once the buffer is full.

use chrono::Utc;
use std::collections::VecDeque;
use tracing::debug;

use crate::models::{HistoryEntry, SensorSample};

/// Default number of samples kept in memory
pub const DEFAULT_CAPACITY: usize = 100;

/// Circular buffer of ingested samples
#[derive(Debug)]
pub struct HistoryBuffer {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    /// Total samples ever pushed
    total_ingested: u64,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            total_ingested: 0,
        }
    }

    /// Append a sample, evicting the oldest entry when full
    pub fn push(&mut self, sample: SensorSample) {
        self.total_ingested += 1;

        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }

        debug!(
            sample_id = %sample.id,
            sequence = sample.sequence,
            total = self.total_ingested,
            "Adding sample to history"
        );

        self.entries.push_back(HistoryEntry {
            sample,
            ingested_at: Utc::now(),
        });
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&SensorSample> {
        self.entries.back().map(|e| &e.sample)
    }

    /// The `n` most recent entries, most recent first
    pub fn window(&self, n: usize) -> Vec<&HistoryEntry> {
        self.entries.iter().rev().take(n).collect()
    }

    /// All entries, most recent first
    pub fn iter_recent(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_ingested(&self) -> u64 {
        self.total_ingested
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(moisture: f64) -> SensorSample {
        SensorSample {
            soil_moisture: moisture,
            ..SensorSample::nominal()
        }
    }

    #[test]
    fn test_empty_buffer() {
        let history = HistoryBuffer::new(10);

        assert!(history.latest().is_none());
        assert!(history.is_empty());
        assert!(history.window(5).is_empty());
        assert_eq!(history.total_ingested(), 0);
    }

    #[test]
    fn test_push_and_latest() {
        let mut history = HistoryBuffer::new(10);

        history.push(sample(40.0));
        history.push(sample(41.0));

        assert_eq!(history.latest().unwrap().soil_moisture, 41.0);
        assert_eq!(history.window(2)[1].sample.soil_moisture, 40.0);
    }

    #[test]
    fn test_circular_buffer() {
        let capacity = 100;
        let mut history = HistoryBuffer::new(capacity);

        for i in 0..(capacity + 10) {
            history.push(sample(i as f64));
            assert!(history.len() <= capacity);
        }

        assert_eq!(history.len(), capacity);
        assert_eq!(history.total_ingested(), (capacity + 10) as u64);

        // Exactly the last `capacity` pushes remain, oldest first evicted
        let kept: Vec<f64> = history
            .iter_recent()
            .map(|e| e.sample.soil_moisture)
            .collect();
        assert_eq!(kept.first().copied(), Some(109.0));
        assert_eq!(kept.last().copied(), Some(10.0));
    }

    #[test]
    fn test_window_most_recent_first() {
        let mut history = HistoryBuffer::new(20);

        for i in 0..10 {
            history.push(sample(20.0 + i as f64));
        }

        let recent = history.window(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].sample.soil_moisture, 29.0);
        assert_eq!(recent[4].sample.soil_moisture, 25.0);

        // Asking for more than stored returns what exists
        assert_eq!(history.window(50).len(), 10);
    }

    #[test]
    fn test_out_of_order_timestamps_kept_in_arrival_order() {
        let mut history = HistoryBuffer::new(5);
        let later = sample(1.0);
        let mut earlier = sample(2.0);
        earlier.timestamp = later.timestamp - chrono::Duration::seconds(30);

        history.push(later);
        history.push(earlier);

        assert_eq!(history.latest().unwrap().soil_moisture, 2.0);
    }
}
