//! # Batch Selection
//!
//! Decides which pending transactions are drawn into the next batch.
//!
//! | Strategy | Ordering key |
//! |----------|--------------|
//! | `Size`   | smallest serialized size first |
//! | `Gas`    | lowest gas limit first |
//! | `Time`   | oldest submission first |
//! | `Hybrid` | lowest `0.3·size/maxSize + 0.4·gas/maxGas + 0.3·(1 − age/maxAge)` |
//!
//! Ties keep queue order. Candidates are then taken greedily while the
//! count stays below `max_count` and the running gas stays within
//! `max_gas`; a candidate that would overflow the gas bound is skipped.
//!
//! Selection is a pure function of the snapshot, strategy, limits and the
//! reference time passed in.

use super::entities::Transaction;
use super::queue::QueueKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const HYBRID_SIZE_WEIGHT: f64 = 0.3;
const HYBRID_GAS_WEIGHT: f64 = 0.4;
const HYBRID_AGE_WEIGHT: f64 = 0.3;

/// Selection strategy (the `aggregationStrategy` option).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionStrategy {
    Size,
    Gas,
    Time,
    #[default]
    Hybrid,
}

impl SelectionStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Gas => "gas",
            Self::Time => "time",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SelectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "size" => Ok(Self::Size),
            "gas" => Ok(Self::Gas),
            "time" | "age" => Ok(Self::Time),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown selection strategy '{other}'")),
        }
    }
}

/// Upper bounds for one batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionLimits {
    pub max_count: usize,
    pub max_gas: u64,
}

/// Select transactions for the next batch.
///
/// `candidates` must be in queue order. Returns the chosen keys in
/// selection order.
#[must_use]
pub fn select_transactions(
    candidates: &[(QueueKey, &Transaction)],
    strategy: SelectionStrategy,
    limits: SelectionLimits,
    now_ms: u64,
) -> Vec<QueueKey> {
    let order = ordering(candidates, strategy, now_ms);

    let mut selected = Vec::with_capacity(limits.max_count.min(candidates.len()));
    let mut gas = 0u64;
    for index in order {
        if selected.len() >= limits.max_count {
            break;
        }
        let (key, tx) = candidates[index];
        let Some(next_gas) = gas.checked_add(tx.gas_limit) else {
            continue;
        };
        if next_gas > limits.max_gas {
            continue;
        }
        gas = next_gas;
        selected.push(key);
    }
    selected
}

/// Candidate indices sorted by the strategy key. The sort is stable, so
/// equal keys keep queue order.
fn ordering(
    candidates: &[(QueueKey, &Transaction)],
    strategy: SelectionStrategy,
    now_ms: u64,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    match strategy {
        SelectionStrategy::Size => {
            let sizes: Vec<u64> = candidates.iter().map(|(_, tx)| tx.serialized_size()).collect();
            order.sort_by_key(|&i| sizes[i]);
        }
        SelectionStrategy::Gas => order.sort_by_key(|&i| candidates[i].1.gas_limit),
        SelectionStrategy::Time => order.sort_by_key(|&i| candidates[i].1.submitted_at),
        SelectionStrategy::Hybrid => {
            let scores = hybrid_scores(candidates, now_ms);
            order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
        }
    }
    order
}

/// Hybrid score per candidate, normalised against the snapshot maxima.
fn hybrid_scores(candidates: &[(QueueKey, &Transaction)], now_ms: u64) -> Vec<f64> {
    let sizes: Vec<f64> = candidates
        .iter()
        .map(|(_, tx)| tx.serialized_size() as f64)
        .collect();
    let gases: Vec<f64> = candidates.iter().map(|(_, tx)| tx.gas_limit as f64).collect();
    let ages: Vec<f64> = candidates
        .iter()
        .map(|(_, tx)| now_ms.saturating_sub(tx.submitted_at) as f64)
        .collect();

    let max_size = sizes.iter().copied().fold(0.0, f64::max);
    let max_gas = gases.iter().copied().fold(0.0, f64::max);
    let max_age = ages.iter().copied().fold(0.0, f64::max);

    (0..candidates.len())
        .map(|i| {
            HYBRID_SIZE_WEIGHT * ratio(sizes[i], max_size)
                + HYBRID_GAS_WEIGHT * ratio(gases[i], max_gas)
                + HYBRID_AGE_WEIGHT * (1.0 - ratio(ages[i], max_age))
        })
        .collect()
}

fn ratio(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        value / max
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::queue::PendingQueue;
    use proptest::prelude::*;

    fn tx(gas: u64, submitted_at: u64, payload: usize) -> Transaction {
        Transaction::new("sender", "recipient", 1, gas)
            .with_signature(vec![1u8; 64])
            .with_submitted_at(submitted_at)
            .with_payload(vec![0u8; payload])
    }

    const LIMITS: SelectionLimits = SelectionLimits {
        max_count: 100,
        max_gas: 30_000_000,
    };

    fn gas_of(queue: &PendingQueue, keys: &[QueueKey]) -> Vec<u64> {
        keys.iter()
            .map(|k| queue.iter().find(|(qk, _)| *qk == k).map(|(_, tx)| tx.gas_limit).unwrap())
            .collect()
    }

    #[test]
    fn test_gas_strategy_lowest_first() {
        let mut queue = PendingQueue::new();
        queue.push(tx(50_000, 0, 0));
        queue.push(tx(21_000, 0, 0));
        queue.push(tx(30_000, 0, 0));

        let keys = select_transactions(&queue.snapshot(), SelectionStrategy::Gas, LIMITS, 0);
        assert_eq!(gas_of(&queue, &keys), vec![21_000, 30_000, 50_000]);
    }

    #[test]
    fn test_time_strategy_oldest_first() {
        let mut queue = PendingQueue::new();
        queue.push(tx(21_000, 300, 0));
        queue.push(tx(22_000, 100, 0));
        queue.push(tx(23_000, 200, 0));

        let keys = select_transactions(&queue.snapshot(), SelectionStrategy::Time, LIMITS, 400);
        assert_eq!(gas_of(&queue, &keys), vec![22_000, 23_000, 21_000]);
    }

    #[test]
    fn test_size_strategy_smallest_first() {
        let mut queue = PendingQueue::new();
        queue.push(tx(21_000, 0, 256));
        queue.push(tx(22_000, 0, 0));

        let keys = select_transactions(&queue.snapshot(), SelectionStrategy::Size, LIMITS, 0);
        assert_eq!(gas_of(&queue, &keys), vec![22_000, 21_000]);
    }

    #[test]
    fn test_count_limit_respected() {
        let mut queue = PendingQueue::new();
        for _ in 0..120 {
            queue.push(tx(21_000, 0, 0));
        }
        let keys = select_transactions(&queue.snapshot(), SelectionStrategy::Hybrid, LIMITS, 0);
        assert_eq!(keys.len(), 100);
    }

    #[test]
    fn test_gas_limit_skips_candidates_that_do_not_fit() {
        let mut queue = PendingQueue::new();
        queue.push(tx(60_000, 0, 0));
        queue.push(tx(50_000, 0, 0));
        queue.push(tx(21_000, 0, 0));

        let limits = SelectionLimits {
            max_count: 10,
            max_gas: 81_000,
        };
        // Queue order under `Time` (all equal): 60k fits, 50k would overflow, 21k fits.
        let keys = select_transactions(&queue.snapshot(), SelectionStrategy::Time, limits, 0);
        assert_eq!(gas_of(&queue, &keys), vec![60_000, 21_000]);
    }

    #[test]
    fn test_equal_keys_keep_queue_order() {
        let mut queue = PendingQueue::new();
        let first = queue.push(tx(21_000, 5, 0));
        let second = queue.push(tx(21_000, 5, 0));
        let keys = select_transactions(&queue.snapshot(), SelectionStrategy::Gas, LIMITS, 10);
        assert_eq!(keys, vec![first, second]);
    }

    #[test]
    fn test_hybrid_prefers_cheap_old_transactions() {
        let mut queue = PendingQueue::new();
        let young_heavy = queue.push(tx(1_000_000, 900, 128));
        let old_light = queue.push(tx(21_000, 0, 0));

        let keys = select_transactions(&queue.snapshot(), SelectionStrategy::Hybrid, LIMITS, 1_000);
        assert_eq!(keys, vec![old_light, young_heavy]);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("hybrid".parse::<SelectionStrategy>(), Ok(SelectionStrategy::Hybrid));
        assert_eq!("GAS".parse::<SelectionStrategy>(), Ok(SelectionStrategy::Gas));
        assert_eq!("age".parse::<SelectionStrategy>(), Ok(SelectionStrategy::Time));
        assert!("fastest".parse::<SelectionStrategy>().is_err());
    }

    fn strategy() -> impl Strategy<Value = SelectionStrategy> {
        prop_oneof![
            Just(SelectionStrategy::Size),
            Just(SelectionStrategy::Gas),
            Just(SelectionStrategy::Time),
            Just(SelectionStrategy::Hybrid),
        ]
    }

    proptest! {
        #[test]
        fn prop_selection_is_deterministic_and_bounded(
            specs in prop::collection::vec((21_000u64..200_000, 0u64..10_000, 0usize..64, 0u8..=10), 0..80),
            strategy in strategy(),
            max_count in 1usize..50,
            max_gas in 21_000u64..2_000_000,
        ) {
            let mut queue = PendingQueue::new();
            for (gas, at, payload, priority) in specs {
                queue.push(tx(gas, at, payload).with_priority(priority));
            }
            let limits = SelectionLimits { max_count, max_gas };
            let snapshot = queue.snapshot();

            let first = select_transactions(&snapshot, strategy, limits, 10_000);
            let second = select_transactions(&snapshot, strategy, limits, 10_000);
            prop_assert_eq!(&first, &second);

            prop_assert!(first.len() <= max_count);
            let total: u64 = gas_of(&queue, &first).iter().sum();
            prop_assert!(total <= max_gas);

            let mut unique = first.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(unique.len(), first.len());
        }
    }
}
