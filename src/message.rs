//! Binding messages to a service
use std::fmt::Debug;

pub use crate::pattern::rpc::{Rpc, RpcMsg};
use crate::Service;

/// A message that can start an interaction with the service `S`.
///
/// A message has exactly one interaction pattern per service.
pub trait Msg<S: Service>: Into<S::Req> + TryFrom<S::Req> + Send + 'static {
    type Pattern: InteractionPattern;
}

/// Marker for the shape of an interaction, e.g. [Rpc].
pub trait InteractionPattern: Debug + Clone + Send + Sync + 'static {}
