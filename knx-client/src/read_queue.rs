//! Queue of pending group reads

use knx_core::{GroupAddress, ReadDatapoint};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Ordered set of pending read requests, deduplicated by bus address
///
/// The queue survives reconnects but is cleared when the link is released:
/// in-flight reads are meaningless without a link. Entries are drained one
/// per tick by the scheduled drain job so two reads are never in flight
/// simultaneously from this layer.
#[derive(Debug, Default)]
pub struct ReadQueue {
    queue: Mutex<VecDeque<ReadDatapoint>>,
}

impl ReadQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a read request
    ///
    /// Inserting an address that is already queued is a no-op; entry
    /// identity is the address alone.
    ///
    /// # Returns
    /// `true` if the entry was added, `false` if the address was present
    pub fn enqueue(&self, datapoint: ReadDatapoint) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.contains(&datapoint) {
            return false;
        }
        queue.push_back(datapoint);
        true
    }

    /// Re-queue an entry that failed and still has retries left
    ///
    /// Dedup applies the same way as for `enqueue`.
    pub fn requeue(&self, datapoint: ReadDatapoint) -> bool {
        self.enqueue(datapoint)
    }

    /// Remove and return the next entry
    pub fn pop(&self) -> Option<ReadDatapoint> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Check whether an address is currently queued
    pub fn contains(&self, address: GroupAddress) -> bool {
        self.queue
            .lock()
            .unwrap()
            .iter()
            .any(|dp| dp.address() == address)
    }

    /// Drop all entries
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }

    /// Get the number of queued entries
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}
