//! Messages of the math service
//!
//! Every arithmetic request has a matching count request that reads the
//! number of times the arithmetic request has been handled.
use derive_more::{From, TryInto};
use serde::{Deserialize, Serialize};

use crate::{counter::Operation, message::RpcMsg, Service};

/// Add two reals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Add {
    pub a: f64,
    pub b: f64,
}

/// Subtract `b` from `a`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Subtract {
    pub a: f64,
    pub b: f64,
}

/// Find the minimum of three integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMin {
    pub a: i64,
    pub b: i64,
    pub c: i64,
}

/// Find the maximum of three integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMax {
    pub a: i64,
    pub b: i64,
    pub c: i64,
}

/// How often has [Add] been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCount;

/// How often has [Subtract] been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtractCount;

/// How often has [FindMin] been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMinCount;

/// How often has [FindMax] been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMaxCount;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubleResult(pub f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntResult(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResult(pub u64);

/// request enum
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum MathRequest {
    Add(Add),
    Subtract(Subtract),
    FindMin(FindMin),
    FindMax(FindMax),
    AddCount(AddCount),
    SubtractCount(SubtractCount),
    FindMinCount(FindMinCount),
    FindMaxCount(FindMaxCount),
}

impl MathRequest {
    /// The operation this request invokes, or `None` for count requests.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            MathRequest::Add(_) => Some(Operation::Add),
            MathRequest::Subtract(_) => Some(Operation::Subtract),
            MathRequest::FindMin(_) => Some(Operation::FindMin),
            MathRequest::FindMax(_) => Some(Operation::FindMax),
            _ => None,
        }
    }
}

/// response enum
#[derive(Debug, Serialize, Deserialize, From, TryInto)]
pub enum MathResponse {
    Double(DoubleResult),
    Int(IntResult),
    Count(CountResult),
}

#[derive(Debug, Clone, Copy)]
pub struct MathService;

impl Service for MathService {
    type Req = MathRequest;
    type Res = MathResponse;
}

impl RpcMsg<MathService> for Add {
    type Response = DoubleResult;
}

impl RpcMsg<MathService> for Subtract {
    type Response = DoubleResult;
}

impl RpcMsg<MathService> for FindMin {
    type Response = IntResult;
}

impl RpcMsg<MathService> for FindMax {
    type Response = IntResult;
}

impl RpcMsg<MathService> for AddCount {
    type Response = CountResult;
}

impl RpcMsg<MathService> for SubtractCount {
    type Response = CountResult;
}

impl RpcMsg<MathService> for FindMinCount {
    type Response = CountResult;
}

impl RpcMsg<MathService> for FindMaxCount {
    type Response = CountResult;
}
