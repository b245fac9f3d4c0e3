// Bounded buffer of raw inbound message lines
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct BufferedMessage {
    pub received_at: DateTime<Utc>,
    pub line: String,
}

/// Ring buffer: once full, the oldest line is evicted for each new one.
#[derive(Debug)]
pub struct MessageBuffer {
    capacity: usize,
    entries: VecDeque<BufferedMessage>,
    total_received: u64,
}

impl MessageBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            total_received: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(BufferedMessage {
            received_at: Utc::now(),
            line,
        });
        self.total_received += 1;
    }

    /// Every retained entry, oldest first.
    pub fn entries(&self) -> Vec<BufferedMessage> {
        self.entries.iter().cloned().collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.line.clone()).collect()
    }

    pub fn latest(&self) -> Option<&BufferedMessage> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Count of all lines ever pushed, including evicted ones.
    pub fn total_received(&self) -> u64 {
        self.total_received
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
