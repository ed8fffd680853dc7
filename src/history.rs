use crate::types::{LinkQuality, Reading};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Bounded drop-oldest buffer used for the rssi window and the raw reading
/// history.
#[derive(Debug)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    /// Number of items evicted to make room for newer ones.
    overruns: u64,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be greater than 0");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            overruns: 0,
        }
    }

    /// Push an item, dropping the oldest when full.
    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.overruns += 1;
            trace!("Ring buffer overrun ({} total)", self.overruns);
        }
        self.items.push_back(item);
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

/// Number of recent rssi samples kept for link-quality estimation.
pub const RSSI_WINDOW_CAPACITY: usize = 5;

/// Number of raw readings retained for display and audit.
pub const RAW_HISTORY_CAPACITY: usize = 50;

/// Rolling raw-signal state shared between the read path and the health
/// monitor. Samples land here for every parsed line, independent of whether
/// the presence filter later admits the reading.
#[derive(Debug)]
pub struct RawHistory {
    rssi_window: RingBuffer<i32>,
    readings: RingBuffer<Reading>,
    last_read_ms: Option<u64>,
}

impl Default for RawHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl RawHistory {
    pub fn new() -> Self {
        debug!(
            "Raw history created ({} rssi samples, {} readings)",
            RSSI_WINDOW_CAPACITY, RAW_HISTORY_CAPACITY
        );
        Self {
            rssi_window: RingBuffer::new(RSSI_WINDOW_CAPACITY),
            readings: RingBuffer::new(RAW_HISTORY_CAPACITY),
            last_read_ms: None,
        }
    }

    /// Record the signal sample and read time for a parsed line, known tag or
    /// not.
    pub fn record_sample(&mut self, rssi: i32, timestamp_ms: u64) {
        self.rssi_window.push(rssi);
        self.last_read_ms = Some(timestamp_ms);
    }

    /// Record a decoded reading in the audit buffer.
    pub fn record_reading(&mut self, reading: Reading) {
        self.readings.push(reading);
    }

    pub fn last_read_ms(&self) -> Option<u64> {
        self.last_read_ms
    }

    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    pub fn rssi_samples(&self) -> impl Iterator<Item = i32> + '_ {
        self.rssi_window.iter().copied()
    }

    /// Estimate link quality from the rssi window. Fewer than 3 samples is
    /// treated as excellent rather than guessing from too little signal.
    pub fn link_quality(&self) -> LinkQuality {
        if self.rssi_window.len() < 3 {
            return LinkQuality::Excellent;
        }
        let sum: i64 = self.rssi_window.iter().map(|&r| r as i64).sum();
        let avg = sum as f64 / self.rssi_window.len() as f64;
        if avg > -60.0 {
            LinkQuality::Excellent
        } else if avg > -75.0 {
            LinkQuality::Good
        } else if avg > -85.0 {
            LinkQuality::Fair
        } else {
            LinkQuality::Poor
        }
    }
}
