// Licensed under the Apache-2.0 license

//! Bounded history of recent queue transactions

use coproc_host_osal::{Instant, Mutex};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sent,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub at: Instant,
    pub direction: Direction,
    pub id: u32,
    pub header: u32,
    pub cmd_type: u32,
}

/// Ring of the last `capacity` transactions. A zero capacity disables it.
pub struct TransactionLog {
    capacity: usize,
    entries: Mutex<VecDeque<Transaction>>,
}

impl TransactionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, direction: Direction, id: u32, header: u32, cmd_type: u32) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock_or_recover();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(Transaction {
            at: Instant::now(),
            direction,
            id,
            header,
            cmd_type,
        });
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.entries.lock_or_recover().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.entries.lock_or_recover().clear();
    }
}
