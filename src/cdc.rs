use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::models::CdcEvent;

pub const DEFAULT_CDC_CAPACITY: usize = 1000;

/// Bounded FIFO of CDC events between the shard's writer path (single
/// producer) and the coordinator stream task (single consumer). When full,
/// `append` blocks until a flush drains the queue; events are never dropped.
pub struct CdcBuffer {
    inner: Mutex<VecDeque<CdcEvent>>,
    capacity: usize,
    drained: Condvar,
}

impl CdcBuffer {
    pub fn new(capacity: usize) -> Self {
        CdcBuffer {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            drained: Condvar::new(),
        }
    }

    /// Append one event, blocking while the buffer is at capacity.
    pub fn append(&self, event: CdcEvent) {
        let mut queue = self.inner.lock().unwrap();
        while queue.len() >= self.capacity {
            queue = self.drained.wait(queue).unwrap();
        }
        queue.push_back(event);
    }

    /// Drain every buffered event in insertion order and unblock producers.
    pub fn flush(&self) -> Vec<CdcEvent> {
        let mut queue = self.inner.lock().unwrap();
        let events: Vec<CdcEvent> = queue.drain(..).collect();
        self.drained.notify_all();
        events
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CdcBuffer {
    fn default() -> Self {
        CdcBuffer::new(DEFAULT_CDC_CAPACITY)
    }
}
