//! Typed client for the math service
use std::time::Duration;

use crate::{
    counter::{Counts, Operation},
    pattern::rpc::Error,
    proto::*,
    Connector, RpcClient,
};

/// Deadline used by [MathClient::new].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Client for the math service.
///
/// Every call carries a deadline. A call that misses it fails with
/// [Error::Timeout]; whether the server counted it is unknown.
#[derive(Debug, Clone)]
pub struct MathClient<C> {
    client: RpcClient<MathService, C>,
    timeout: Duration,
}

impl<C: Connector<MathService>> MathClient<C> {
    /// Create a client using [DEFAULT_TIMEOUT] as the deadline of every call.
    pub fn new(conn: C) -> Self {
        Self::with_timeout(conn, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom per call deadline.
    pub fn with_timeout(conn: C, timeout: Duration) -> Self {
        Self {
            client: RpcClient::new(conn),
            timeout,
        }
    }

    pub async fn add(&self, a: f64, b: f64) -> Result<f64, Error<C>> {
        let res = self.client.rpc_with_timeout(Add { a, b }, self.timeout).await?;
        Ok(res.0)
    }

    pub async fn subtract(&self, a: f64, b: f64) -> Result<f64, Error<C>> {
        let res = self
            .client
            .rpc_with_timeout(Subtract { a, b }, self.timeout)
            .await?;
        Ok(res.0)
    }

    pub async fn find_min(&self, a: i64, b: i64, c: i64) -> Result<i64, Error<C>> {
        let res = self
            .client
            .rpc_with_timeout(FindMin { a, b, c }, self.timeout)
            .await?;
        Ok(res.0)
    }

    pub async fn find_max(&self, a: i64, b: i64, c: i64) -> Result<i64, Error<C>> {
        let res = self
            .client
            .rpc_with_timeout(FindMax { a, b, c }, self.timeout)
            .await?;
        Ok(res.0)
    }

    /// How often the server has handled `op`.
    pub async fn count(&self, op: Operation) -> Result<u64, Error<C>> {
        let res = match op {
            Operation::Add => self.client.rpc_with_timeout(AddCount, self.timeout).await?,
            Operation::Subtract => {
                self.client
                    .rpc_with_timeout(SubtractCount, self.timeout)
                    .await?
            }
            Operation::FindMin => {
                self.client
                    .rpc_with_timeout(FindMinCount, self.timeout)
                    .await?
            }
            Operation::FindMax => {
                self.client
                    .rpc_with_timeout(FindMaxCount, self.timeout)
                    .await?
            }
        };
        Ok(res.0)
    }

    /// Read all four counters, one call each.
    pub async fn counts(&self) -> Result<Counts, Error<C>> {
        let mut counts = Counts::default();
        for op in Operation::ALL {
            counts.set(op, self.count(op).await?);
        }
        Ok(counts)
    }
}
