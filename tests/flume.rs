#![cfg(feature = "flume-transport")]
mod util;
use std::{sync::Arc, time::Duration};

use magic_math::{
    api::MathClient,
    counter::{CounterStore, Operation},
    handler::Handler,
    pattern::rpc::Error,
    proto::{MathRequest, MathResponse},
    server::RpcServerError,
    transport::flume,
};
use util::*;

#[tokio::test]
async fn flume_channel_smoke() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let (server, client) = flume::channel::<MathRequest, MathResponse>(1);
    let (_counters, server_handle) = spawn_server(server);
    let client = MathClient::new(client);
    smoke_test(&client).await?;

    // dropping the client will cause the server to terminate
    drop(client);
    match server_handle.await? {
        Err(RpcServerError::Accept(_)) => {}
        e => panic!("unexpected termination result {e:?}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flume_channel_burst() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let (server, client) = flume::channel::<MathRequest, MathResponse>(32);
    let (counters, _server_handle) = spawn_server(server);
    burst_test(MathClient::new(client), &counters, 1000).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flume_channel_mixed_contention() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let (server, client) = flume::channel::<MathRequest, MathResponse>(8);
    let (counters, _server_handle) = spawn_server(server);
    mixed_contention_test(MathClient::new(client), &counters).await?;
    assert_eq!(counters.snapshot(Operation::FindMin), 0);
    assert_eq!(counters.snapshot(Operation::FindMax), 0);
    Ok(())
}

#[tokio::test]
async fn flume_channel_timeout_without_server() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    // a listener that never accepts
    let (_server, client) = flume::channel::<MathRequest, MathResponse>(1);
    let client = MathClient::with_timeout(client, Duration::from_millis(50));
    match client.add(1.0, 2.0).await {
        Err(Error::Timeout) => {}
        res => panic!("expected a timeout, got {res:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn flume_channel_timeout_after_accept_still_counts() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let (server, client) = flume::channel::<MathRequest, MathResponse>(1);
    let counters = Arc::new(CounterStore::new());
    let handler = Handler::with_latency(counters.clone(), Duration::from_millis(200));
    let _server_handle = spawn_server_with(server, handler);

    // the server takes the call but answers after the deadline
    let impatient = MathClient::with_timeout(client.clone(), Duration::from_millis(50));
    match impatient.add(1.0, 2.0).await {
        Err(Error::Timeout) => {}
        res => panic!("expected a timeout, got {res:?}"),
    }

    // count requests skip the latency, the add was counted when it arrived
    let client = MathClient::new(client);
    assert_eq!(client.count(Operation::Add).await?, 1);
    assert_eq!(counters.total(), 1);

    // the server keeps working after the cancelled call
    assert_eq!(client.subtract(3.0, 1.0).await?, 2.0);
    assert_eq!(client.count(Operation::Subtract).await?, 1);
    Ok(())
}

#[tokio::test]
async fn flume_channel_listener_gone() -> anyhow::Result<()> {
    let (server, client) = flume::channel::<MathRequest, MathResponse>(1);
    drop(server);
    let client = MathClient::new(client);
    match client.find_max(1, 2, 3).await {
        Err(Error::Open(_)) => {}
        res => panic!("expected an open error, got {res:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn independent_servers_count_independently() -> anyhow::Result<()> {
    let (server_a, client_a) = flume::channel::<MathRequest, MathResponse>(1);
    let (server_b, client_b) = flume::channel::<MathRequest, MathResponse>(1);
    let (counters_a, _a) = spawn_server(server_a);
    let (counters_b, _b) = spawn_server(server_b);
    let client_a = MathClient::new(client_a);
    let client_b = MathClient::new(client_b);
    client_a.add(1.0, 1.0).await?;
    client_a.add(1.0, 1.0).await?;
    client_b.find_min(1, 2, 3).await?;
    assert_eq!(client_a.count(Operation::Add).await?, 2);
    assert_eq!(client_b.count(Operation::Add).await?, 0);
    assert_eq!(counters_a.total(), 2);
    assert_eq!(counters_b.total(), 1);
    Ok(())
}
