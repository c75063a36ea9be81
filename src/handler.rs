//! Server side of the math service
use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    counter::{CounterStore, Operation},
    math,
    proto::*,
    server::{RpcChannel, RpcServerError},
    Listener, RpcServer,
};

/// Handles math requests against a shared [CounterStore].
///
/// Cloning a handler is cheap and every clone counts into the same store.
#[derive(Debug, Clone, Default)]
pub struct Handler {
    counters: Arc<CounterStore>,
    latency: Duration,
}

impl Handler {
    pub fn new(counters: Arc<CounterStore>) -> Self {
        Self::with_latency(counters, Duration::ZERO)
    }

    /// A handler that spends `latency` on every arithmetic call, after
    /// counting it and before answering.
    ///
    /// Useful to see how clients behave when their deadline is shorter than
    /// the time the server takes.
    pub fn with_latency(counters: Arc<CounterStore>, latency: Duration) -> Self {
        Self { counters, latency }
    }

    /// The store this handler counts into.
    pub fn counters(&self) -> &Arc<CounterStore> {
        &self.counters
    }

    pub async fn handle_rpc_request<C: Listener<MathService>>(
        self,
        req: MathRequest,
        chan: RpcChannel<MathService, C>,
    ) -> Result<(), RpcServerError<C>> {
        use MathRequest::*;
        debug!(?req, "handling request");
        // count on arrival, a call cancelled later stays counted
        if let Some(op) = req.operation() {
            self.counters.increment(op);
        }
        match req {
            Add(msg) => chan.rpc(msg, self, Self::on_add).await,
            Subtract(msg) => chan.rpc(msg, self, Self::on_subtract).await,
            FindMin(msg) => chan.rpc(msg, self, Self::on_find_min).await,
            FindMax(msg) => chan.rpc(msg, self, Self::on_find_max).await,
            AddCount(msg) => chan.rpc(msg, self, |h, _| h.on_count(Operation::Add)).await,
            SubtractCount(msg) => {
                chan.rpc(msg, self, |h, _| h.on_count(Operation::Subtract))
                    .await
            }
            FindMinCount(msg) => {
                chan.rpc(msg, self, |h, _| h.on_count(Operation::FindMin))
                    .await
            }
            FindMaxCount(msg) => {
                chan.rpc(msg, self, |h, _| h.on_count(Operation::FindMax))
                    .await
            }
        }
    }

    async fn on_add(self, req: Add) -> DoubleResult {
        self.work().await;
        DoubleResult(math::add(req.a, req.b))
    }

    async fn on_subtract(self, req: Subtract) -> DoubleResult {
        self.work().await;
        DoubleResult(math::subtract(req.a, req.b))
    }

    async fn on_find_min(self, req: FindMin) -> IntResult {
        self.work().await;
        IntResult(math::find_min(req.a, req.b, req.c))
    }

    async fn on_find_max(self, req: FindMax) -> IntResult {
        self.work().await;
        IntResult(math::find_max(req.a, req.b, req.c))
    }

    async fn work(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn on_count(self, op: Operation) -> CountResult {
        CountResult(self.counters.snapshot(op))
    }
}

/// Run the accept loop of a math server.
///
/// Every accepted channel is handled on its own task, so slow or stalled
/// clients do not hold up other calls. Returns when accepting fails, e.g.
/// because all connectors of an in memory transport were dropped.
pub async fn serve<C: Listener<MathService>>(
    server: RpcServer<MathService, C>,
    handler: Handler,
) -> Result<(), RpcServerError<C>> {
    loop {
        let accepting = server.accept().await?;
        let handler = handler.clone();
        tokio::task::spawn(async move {
            let (req, chan) = match accepting.read_first().await {
                Ok(x) => x,
                Err(cause) => {
                    warn!(?cause, "failed to read request");
                    return;
                }
            };
            if let Err(cause) = handler.handle_rpc_request(req, chan).await {
                warn!(?cause, "failed to handle request");
            }
        });
    }
}
