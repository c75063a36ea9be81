#![allow(unused)]
use std::sync::Arc;

use anyhow::Context;
use magic_math::{
    api::MathClient,
    counter::{CounterStore, Operation},
    driver,
    handler::{self, Handler},
    proto::MathService,
    server::RpcServerError,
    Connector, Listener, RpcServer,
};
use rand::SeedableRng;
use tokio::task::JoinHandle;

pub type ServerHandle<C> = JoinHandle<Result<(), RpcServerError<C>>>;

/// Start a math server on `listener` with a fresh counter store.
pub fn spawn_server<C: Listener<MathService>>(listener: C) -> (Arc<CounterStore>, ServerHandle<C>) {
    let handler = Handler::new(Arc::new(CounterStore::new()));
    let counters = handler.counters().clone();
    (counters, spawn_server_with(listener, handler))
}

/// Start a math server on `listener` that answers with `handler`.
pub fn spawn_server_with<C: Listener<MathService>>(listener: C, handler: Handler) -> ServerHandle<C> {
    let server = RpcServer::new(listener);
    tokio::task::spawn(handler::serve(server, handler))
}

/// Every request once, checking results and counters as we go.
pub async fn smoke_test<C: Connector<MathService>>(client: &MathClient<C>) -> anyhow::Result<()> {
    for op in Operation::ALL {
        assert_eq!(client.count(op).await?, 0, "{op} should start at zero");
    }

    assert_eq!(client.add(5.0, 2.0).await?, 7.0);
    assert_eq!(client.subtract(5.0, 2.0).await?, 3.0);
    assert_eq!(client.find_min(5, 2, 3).await?, 2);
    assert_eq!(client.find_max(5, 2, 3).await?, 5);
    assert_eq!(client.find_min(9, 9, 9).await?, 9);
    assert_eq!(client.find_max(-1, -1, -7).await?, -1);

    let counts = client.counts().await?;
    assert_eq!(counts.get(Operation::Add), 1);
    assert_eq!(counts.get(Operation::Subtract), 1);
    assert_eq!(counts.get(Operation::FindMin), 2);
    assert_eq!(counts.get(Operation::FindMax), 2);
    assert_eq!(counts.total(), 6);

    // reading does not count
    assert_eq!(client.counts().await?, counts);
    Ok(())
}

/// Run a burst of `n` random calls and check the server agrees with what was sent.
pub async fn burst_test<C: Connector<MathService>>(
    client: MathClient<C>,
    counters: &CounterStore,
    n: usize,
) -> anyhow::Result<()> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let calls = driver::plan(&mut rng, n, &Operation::ALL);
    let report = driver::run_burst(client, calls).await?;
    assert_eq!(report.failed, 0);
    assert_eq!(report.succeeded, n as u64);
    assert_eq!(report.counts, report.sent);
    assert_eq!(report.counts.total(), n as u64);
    assert_eq!(counters.snapshot_all(), report.counts);
    Ok(())
}

/// 100 adds and 50 subtracts from many concurrent callers.
pub async fn mixed_contention_test<C: Connector<MathService>>(
    client: MathClient<C>,
    counters: &CounterStore,
) -> anyhow::Result<()> {
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..150 {
        let client = client.clone();
        tasks.spawn(async move {
            if i % 3 == 2 {
                client.subtract(i as f64, 1.0).await
            } else {
                client.add(i as f64, 1.0).await
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.context("task panicked")??;
    }
    assert_eq!(client.count(Operation::Add).await?, 100);
    assert_eq!(client.count(Operation::Subtract).await?, 50);
    assert_eq!(counters.total(), 150);
    Ok(())
}
