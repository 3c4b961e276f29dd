use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::types::{Log, WeatherSnapshot};

pub const MAX_LOGS: usize = 10;
pub const MAX_WEATHER_LOGS: usize = 10;

/// Fixed-capacity buffer that evicts its oldest entry on overflow.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator + '_ {
        self.items.iter()
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
}

/// Past controller evaluations, oldest first.
#[derive(Debug, Clone)]
pub struct TemperatureHistory {
    logs: RingBuffer<Log>,
}

impl Default for TemperatureHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureHistory {
    pub fn new() -> Self {
        Self {
            logs: RingBuffer::new(MAX_LOGS),
        }
    }

    pub fn add(
        &mut self,
        timestamp_ms: u64,
        inside_temperature: f64,
        window_opening: u8,
        delta_before_threshold: i32,
    ) {
        self.logs.push(Log {
            timestamp_ms,
            inside_temperature,
            window_opening: window_opening.min(100),
            delta_before_threshold,
        });
    }

    pub fn last(&self) -> Option<&Log> {
        self.logs.latest()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Log> + ExactSizeIterator + '_ {
        self.logs.iter()
    }

    /// Up to `amount` most recent samples, newest first.
    pub fn last_logs(&self, amount: usize) -> Vec<Log> {
        self.logs.iter().rev().take(amount).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// Past weather/air-quality snapshots, oldest first.
#[derive(Debug, Clone)]
pub struct WeatherHistory {
    snapshots: RingBuffer<WeatherSnapshot>,
}

impl Default for WeatherHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl WeatherHistory {
    pub fn new() -> Self {
        Self {
            snapshots: RingBuffer::new(MAX_WEATHER_LOGS),
        }
    }

    pub fn add(&mut self, snapshot: WeatherSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn last(&self) -> Option<&WeatherSnapshot> {
        self.snapshots.latest()
    }

    /// Latest snapshot, if every one of its readings is within `max_age` of
    /// `now`. Older snapshots are never consulted, and an unknown wall clock
    /// counts as stale.
    pub fn latest_fresh(
        &self,
        now: Option<DateTime<Utc>>,
        max_age: chrono::Duration,
    ) -> Option<&WeatherSnapshot> {
        let now = now?;
        self.snapshots
            .latest()
            .filter(|snapshot| snapshot.is_fresh(now, max_age))
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
