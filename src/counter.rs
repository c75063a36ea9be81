//! Invocation counters
//!
//! A [CounterStore] holds one monotonically increasing counter per [Operation].
//! It is created once by the server and shared with every request handler
//! through an [Arc](std::sync::Arc).
//!
//! Each counter is an independent atomic on its own cache line, so handlers
//! for different operations never contend, and handlers for the same operation
//! only contend for the duration of a single atomic instruction.
use std::{
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use crossbeam_utils::CachePadded;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// One of the counted arithmetic operations.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Sum of two reals
    #[display("add")]
    Add,
    /// Difference of two reals
    #[display("subtract")]
    Subtract,
    /// Minimum of three integers
    #[display("find_min")]
    FindMin,
    /// Maximum of three integers
    #[display("find_max")]
    FindMax,
}

impl Operation {
    /// All operations, in declaration order.
    pub const ALL: [Operation; 4] = [
        Operation::Add,
        Operation::Subtract,
        Operation::FindMin,
        Operation::FindMax,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Error returned when parsing an unknown operation name.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
#[display("unknown operation {_0:?}, expected one of add, subtract, find_min, find_max")]
pub struct ParseOperationError(String);

impl std::error::Error for ParseOperationError {}

impl FromStr for Operation {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.to_string() == s)
            .ok_or_else(|| ParseOperationError(s.to_string()))
    }
}

/// Per operation invocation counters.
#[derive(Debug, Default)]
pub struct CounterStore {
    counters: [CachePadded<AtomicU64>; Operation::ALL.len()],
}

impl CounterStore {
    /// Create a store with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one invocation of `op`.
    pub fn increment(&self, op: Operation) {
        self.counters[op.index()].fetch_add(1, Ordering::Release);
    }

    /// The number of invocations of `op` counted so far.
    ///
    /// Every increment that happened before this call is included.
    pub fn snapshot(&self, op: Operation) -> u64 {
        self.counters[op.index()].load(Ordering::Acquire)
    }

    /// Sum of all counters.
    ///
    /// The counters are read one after the other, so this is not an atomic view
    /// of all four while increments are in flight.
    pub fn total(&self) -> u64 {
        self.snapshot_all().total()
    }

    /// Read every counter, with the same caveat as [CounterStore::total].
    pub fn snapshot_all(&self) -> Counts {
        Counts {
            add: self.snapshot(Operation::Add),
            subtract: self.snapshot(Operation::Subtract),
            find_min: self.snapshot(Operation::FindMin),
            find_max: self.snapshot(Operation::FindMax),
        }
    }
}

/// A set of counter values, one per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub add: u64,
    pub subtract: u64,
    pub find_min: u64,
    pub find_max: u64,
}

impl Counts {
    /// The value for `op`.
    pub fn get(&self, op: Operation) -> u64 {
        match op {
            Operation::Add => self.add,
            Operation::Subtract => self.subtract,
            Operation::FindMin => self.find_min,
            Operation::FindMax => self.find_max,
        }
    }

    /// Set the value for `op`.
    pub fn set(&mut self, op: Operation, value: u64) {
        match op {
            Operation::Add => self.add = value,
            Operation::Subtract => self.subtract = value,
            Operation::FindMin => self.find_min = value,
            Operation::FindMax => self.find_max = value,
        }
    }

    /// Sum over all operations.
    pub fn total(&self) -> u64 {
        Operation::ALL.into_iter().map(|op| self.get(op)).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn fresh_store_is_zero() {
        let store = CounterStore::new();
        for op in Operation::ALL {
            assert_eq!(store.snapshot(op), 0);
        }
        assert_eq!(store.total(), 0);
        assert_eq!(store.snapshot_all(), Counts::default());
    }

    #[test]
    fn increments_are_per_operation() {
        let store = CounterStore::new();
        store.increment(Operation::FindMin);
        store.increment(Operation::FindMin);
        store.increment(Operation::Add);
        assert_eq!(store.snapshot(Operation::Add), 1);
        assert_eq!(store.snapshot(Operation::Subtract), 0);
        assert_eq!(store.snapshot(Operation::FindMin), 2);
        assert_eq!(store.snapshot(Operation::FindMax), 0);
        assert_eq!(store.total(), 3);
    }

    #[test]
    fn stores_are_independent() {
        let a = CounterStore::new();
        let b = CounterStore::new();
        a.increment(Operation::Subtract);
        assert_eq!(a.snapshot(Operation::Subtract), 1);
        assert_eq!(b.snapshot(Operation::Subtract), 0);
    }

    #[test]
    fn no_lost_updates_across_threads() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 10_000;
        let store = CounterStore::new();
        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..PER_THREAD {
                        store.increment(Operation::FindMax);
                    }
                });
            }
        });
        assert_eq!(store.snapshot(Operation::FindMax), (THREADS * PER_THREAD) as u64);
        assert_eq!(store.total(), (THREADS * PER_THREAD) as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn thousand_concurrent_callers() -> testresult::TestResult<()> {
        let store = Arc::new(CounterStore::new());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..1000 {
            let store = store.clone();
            tasks.spawn(async move { store.increment(Operation::Add) });
        }
        while let Some(res) = tasks.join_next().await {
            res?;
        }
        assert_eq!(store.snapshot(Operation::Add), 1000);
        Ok(())
    }

    #[test]
    fn concurrent_operations_do_not_perturb_each_other() {
        let store = CounterStore::new();
        std::thread::scope(|s| {
            for i in 0..10 {
                let store = &store;
                s.spawn(move || {
                    for _ in 0..10 {
                        store.increment(Operation::Add);
                    }
                    for _ in 0..5 {
                        store.increment(Operation::Subtract);
                    }
                    // read while others are still writing
                    if i % 2 == 0 {
                        assert!(store.snapshot(Operation::Add) <= 100);
                        assert!(store.snapshot(Operation::Subtract) <= 50);
                    }
                });
            }
        });
        assert_eq!(store.snapshot(Operation::Add), 100);
        assert_eq!(store.snapshot(Operation::Subtract), 50);
        assert_eq!(store.snapshot(Operation::FindMin), 0);
        assert_eq!(store.snapshot(Operation::FindMax), 0);
        assert_eq!(store.total(), 150);
    }

    #[test]
    fn snapshots_are_monotone() {
        let store = CounterStore::new();
        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..50_000 {
                    store.increment(Operation::Subtract);
                }
            });
            s.spawn(|| {
                let mut last = 0;
                for _ in 0..50_000 {
                    let now = store.snapshot(Operation::Subtract);
                    assert!(now >= last, "counter went backwards: {last} -> {now}");
                    last = now;
                }
            });
        });
        assert_eq!(store.snapshot(Operation::Subtract), 50_000);
    }

    #[test]
    fn operation_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.to_string().parse::<Operation>(), Ok(op));
        }
        assert_eq!(Operation::FindMin.to_string(), "find_min");
        let err = "multiply".parse::<Operation>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown operation \"multiply\", expected one of add, subtract, find_min, find_max"
        );
    }

    #[test]
    fn counts_total_and_accessors() {
        let mut counts = Counts::default();
        counts.set(Operation::Add, 3);
        counts.set(Operation::FindMax, 4);
        assert_eq!(counts.get(Operation::Add), 3);
        assert_eq!(counts.get(Operation::Subtract), 0);
        assert_eq!(counts.total(), 7);
    }
}
