//! # Pending Queue
//!
//! Stable priority queue of accepted transactions: higher priority first,
//! insertion order among equal priorities.
//!
//! The queue itself is not synchronized. The batcher wraps it in a single
//! mutex so that selecting and removing a batch's transactions is one atomic
//! step.

use super::entities::Transaction;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Position of a transaction in the pending queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    priority: Reverse<u8>,
    sequence: u64,
}

impl QueueKey {
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority.0
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Priority-ordered pending transactions.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BTreeMap<QueueKey, Transaction>,
    next_sequence: u64,
}

impl PendingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction behind every pending one of equal priority.
    pub fn push(&mut self, tx: Transaction) -> QueueKey {
        let key = QueueKey {
            priority: Reverse(tx.priority),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.insert(key, tx);
        key
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Priority of the head of the queue.
    #[must_use]
    pub fn top_priority(&self) -> Option<u8> {
        self.entries.keys().next().map(QueueKey::priority)
    }

    /// Iterate in queue order.
    pub fn iter(&self) -> impl Iterator<Item = (&QueueKey, &Transaction)> {
        self.entries.iter()
    }

    /// Queue-order snapshot for selection.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(QueueKey, &Transaction)> {
        self.entries.iter().map(|(k, tx)| (*k, tx)).collect()
    }

    /// Remove the given keys, returning the transactions in key order given.
    ///
    /// Keys that are no longer present are skipped.
    pub fn take(&mut self, keys: &[QueueKey]) -> Vec<Transaction> {
        keys.iter()
            .filter_map(|key| self.entries.remove(key))
            .collect()
    }

    /// Sum of pending gas limits.
    #[must_use]
    pub fn total_gas(&self) -> u64 {
        self.entries.values().map(|tx| tx.gas_limit).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(priority: u8) -> Transaction {
        Transaction::new("a", "b", 1, 21_000)
            .with_priority(priority)
            .with_signature(vec![0u8; 64])
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = PendingQueue::new();
        queue.push(tx(1));
        queue.push(tx(9));
        queue.push(tx(5));

        let priorities: Vec<u8> = queue.iter().map(|(_, tx)| tx.priority).collect();
        assert_eq!(priorities, vec![9, 5, 1]);
        assert_eq!(queue.top_priority(), Some(9));
    }

    #[test]
    fn test_fifo_among_equal_priority() {
        let mut queue = PendingQueue::new();
        let first = tx(3);
        let second = tx(3);
        let third = tx(3);
        let ids = vec![first.id, second.id, third.id];
        queue.push(first);
        queue.push(second);
        queue.push(third);

        let order: Vec<_> = queue.iter().map(|(_, tx)| tx.id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn test_take_removes_only_selected() {
        let mut queue = PendingQueue::new();
        let k1 = queue.push(tx(0));
        let _k2 = queue.push(tx(0));
        let k3 = queue.push(tx(0));

        let taken = queue.take(&[k3, k1]);
        assert_eq!(taken.len(), 2);
        assert_eq!(queue.len(), 1);

        // Second removal of the same keys yields nothing.
        assert!(queue.take(&[k1, k3]).is_empty());
    }

    #[test]
    fn test_total_gas() {
        let mut queue = PendingQueue::new();
        queue.push(tx(0));
        queue.push(tx(0));
        assert_eq!(queue.total_gas(), 42_000);
    }
}
