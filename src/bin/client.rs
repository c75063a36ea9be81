//! magic-math client
//!
//! Fires a burst of concurrent random calls at a server and prints the
//! invocation counts the server reports afterwards.
use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use magic_math::{
    api::MathClient,
    client::TcpConnector,
    counter::Operation,
    driver::{self, DEFAULT_BURST},
    proto::MathService,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "magic-math-client", about = "Load generator for magic-math")]
struct Cli {
    /// The address to connect to.
    #[arg(long, default_value = "127.0.0.1:50051")]
    addr: SocketAddr,

    /// Number of concurrent calls.
    #[arg(long, default_value_t = DEFAULT_BURST)]
    burst: usize,

    /// Deadline of every call, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Only call this operation (add, subtract, find_min, find_max).
    #[arg(long)]
    op: Option<Operation>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();
    let cli = Cli::parse();

    let conn = TcpConnector::<MathService>::new(cli.addr);
    let client = MathClient::with_timeout(conn, Duration::from_millis(cli.timeout_ms));
    let ops = match cli.op {
        Some(op) => vec![op],
        None => Operation::ALL.to_vec(),
    };
    let calls = driver::plan(&mut rand::thread_rng(), cli.burst, &ops);
    let report = driver::run_burst(client, calls).await?;

    println!("sent {} calls, {} failed", report.succeeded + report.failed, report.failed);
    for op in Operation::ALL {
        println!("{op} count: {}", report.counts.get(op));
    }
    println!("total count: {}", report.counts.total());
    Ok(())
}
