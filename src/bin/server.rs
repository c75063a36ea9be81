//! magic-math server
//!
//! Serves the math service over tcp and logs the final counts on ctrl-c.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use clap::Parser;
use magic_math::{
    counter::{CounterStore, Operation},
    handler::{self, Handler},
    proto::{MathRequest, MathResponse, MathService},
    transport::{tcp::TcpListener, Listener},
    RpcServer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "magic-math-server", about = "Counted arithmetic over rpc")]
struct Cli {
    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    addr: std::net::IpAddr,

    /// The server port.
    #[arg(long, default_value_t = 50051)]
    port: u16,

    /// Time spent on every arithmetic call, in milliseconds.
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    let cli = Cli::parse();

    let bind = SocketAddr::new(cli.addr, cli.port);
    let listener = TcpListener::<MathRequest, MathResponse>::bind(bind)
        .await
        .with_context(|| format!("failed to listen on {bind}"))?;
    let server = RpcServer::<MathService, _>::new(listener);
    for addr in server.listener().local_addr() {
        info!("server listening at {addr}");
    }

    let counters = Arc::new(CounterStore::new());
    let handler = Handler::with_latency(counters.clone(), Duration::from_millis(cli.latency_ms));
    tokio::select! {
        res = handler::serve(server, handler) => {
            res.context("server stopped")?;
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to wait for ctrl-c")?;
            info!("shutting down");
        }
    }
    for op in Operation::ALL {
        info!("{op} count: {}", counters.snapshot(op));
    }
    info!("total count: {}", counters.total());
    Ok(())
}
