//! Load generator for the math service
//!
//! Fires a burst of concurrent calls with randomly chosen operations, then
//! asks the server how often each operation was invoked.
use std::time::Instant;

use anyhow::Context;
use rand::{seq::SliceRandom, Rng};
use tracing::{debug, info, warn};

use crate::{
    api::MathClient,
    counter::{Counts, Operation},
    pattern::rpc::Error,
    proto::MathService,
    Connector,
};

/// Default number of calls in a burst.
pub const DEFAULT_BURST: usize = 1000;

/// One planned call, operands included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Call {
    Add(f64, f64),
    Subtract(f64, f64),
    FindMin(i64, i64, i64),
    FindMax(i64, i64, i64),
}

impl Call {
    /// A call of `op` with random operands.
    pub fn random(rng: &mut impl Rng, op: Operation) -> Self {
        match op {
            Operation::Add => Call::Add(rng.gen_range(-1e6..1e6), rng.gen_range(-1e6..1e6)),
            Operation::Subtract => {
                Call::Subtract(rng.gen_range(-1e6..1e6), rng.gen_range(-1e6..1e6))
            }
            Operation::FindMin => Call::FindMin(rng.gen(), rng.gen(), rng.gen()),
            Operation::FindMax => Call::FindMax(rng.gen(), rng.gen(), rng.gen()),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Call::Add(..) => Operation::Add,
            Call::Subtract(..) => Operation::Subtract,
            Call::FindMin(..) => Operation::FindMin,
            Call::FindMax(..) => Operation::FindMax,
        }
    }

    async fn invoke<C: Connector<MathService>>(self, client: &MathClient<C>) -> Result<(), Error<C>> {
        match self {
            Call::Add(a, b) => client.add(a, b).await.map(drop),
            Call::Subtract(a, b) => client.subtract(a, b).await.map(drop),
            Call::FindMin(a, b, c) => client.find_min(a, b, c).await.map(drop),
            Call::FindMax(a, b, c) => client.find_max(a, b, c).await.map(drop),
        }
    }
}

/// Plan `n` calls, each with an operation drawn uniformly from `ops`.
///
/// `ops` must not be empty.
pub fn plan(rng: &mut impl Rng, n: usize, ops: &[Operation]) -> Vec<Call> {
    (0..n)
        .filter_map(|_| {
            let op = *ops.choose(rng)?;
            Some(Call::random(rng, op))
        })
        .collect()
}

/// Outcome of a burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstReport {
    /// Calls that got a response
    pub succeeded: u64,
    /// Calls that failed, including calls that missed their deadline
    pub failed: u64,
    /// Calls sent per operation
    pub sent: Counts,
    /// Counters as reported by the server after the burst
    pub counts: Counts,
}

/// Run `calls` concurrently, then read the server's counters.
///
/// Failed calls are logged and counted but do not abort the burst. Failing to
/// read the counters afterwards is an error.
pub async fn run_burst<C: Connector<MathService>>(
    client: MathClient<C>,
    calls: Vec<Call>,
) -> anyhow::Result<BurstReport> {
    let t0 = Instant::now();
    let mut sent = Counts::default();
    let mut tasks = tokio::task::JoinSet::new();
    for call in calls {
        let op = call.operation();
        sent.set(op, sent.get(op) + 1);
        let client = client.clone();
        tasks.spawn(async move { call.invoke(&client).await });
    }
    let (mut succeeded, mut failed) = (0u64, 0u64);
    while let Some(res) = tasks.join_next().await {
        match res.context("call task panicked")? {
            Ok(()) => succeeded += 1,
            Err(cause) => {
                debug!(%cause, "call failed");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        warn!(failed, "some calls failed");
    }
    info!(succeeded, elapsed = ?t0.elapsed(), "burst done");
    let counts = client.counts().await.context("failed to read counters")?;
    Ok(BurstReport {
        succeeded,
        failed,
        sent,
        counts,
    })
}
