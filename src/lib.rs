//! Counted arithmetic served over a small typed rpc layer
//!
//! The service exposes four arithmetic operations and, for each of them, a
//! request that reports how many times it has been invoked. The invocation
//! counts live in a [`counter::CounterStore`] that is shared by every request
//! handler.
//!
//! # Example
//! ```
//! # #[cfg(feature = "flume-transport")]
//! # async fn example() -> anyhow::Result<()> {
//! use magic_math::{
//!     api::MathClient, counter::Operation, handler::Handler, transport::flume, RpcServer,
//! };
//!
//! // create a transport channel
//! let (server, client) = flume::channel(1);
//!
//! // run the server with a fresh counter store
//! let handler = Handler::default();
//! tokio::task::spawn(magic_math::handler::serve(RpcServer::new(server), handler));
//!
//! // call the service
//! let client = MathClient::new(client);
//! assert_eq!(client.add(5.0, 2.0).await?, 7.0);
//! assert_eq!(client.count(Operation::Add).await?, 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
#![doc = document_features::document_features!()]
#![cfg_attr(magicmath_docsrs, feature(doc_cfg))]
use std::fmt::{Debug, Display};

use serde::{de::DeserializeOwned, Serialize};
pub mod api;
pub mod client;
pub mod counter;
pub mod driver;
pub mod handler;
pub mod math;
pub mod message;
pub mod pattern;
pub mod proto;
pub mod server;
pub mod transport;
pub use client::RpcClient;
pub use server::RpcServer;

/// Anything that travels over a transport.
///
/// Messages must be serializable even on the flume transport, which moves
/// them without encoding, so a service works the same on every transport.
pub trait RpcMessage: Debug + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}

impl<T> RpcMessage for T where
    T: Debug + Serialize + DeserializeOwned + Send + Sync + Unpin + 'static
{
}

/// Bounds for transport errors, so they can be logged and sent across tasks.
pub trait RpcError: Debug + Display + Send + Sync + Unpin + 'static {}

impl<T> RpcError for T where T: Debug + Display + Send + Sync + Unpin + 'static {}

/// A service: one request type and one response type shared by both sides.
///
/// The individual messages are tied to the service through
/// [message::RpcMsg], which also names the response each request gets.
pub trait Service: Send + Sync + Debug + Clone + 'static {
    type Req: RpcMessage;
    type Res: RpcMessage;
}

/// A [transport::Connector] that speaks the service `S`.
pub trait Connector<S: Service>: transport::Connector<In = S::Res, Out = S::Req> {}

impl<T: transport::Connector<In = S::Res, Out = S::Req>, S: Service> Connector<S> for T {}

/// A [transport::Listener] that speaks the service `S`.
pub trait Listener<S: Service>: transport::Listener<In = S::Req, Out = S::Res> {}

impl<T: transport::Listener<In = S::Req, Out = S::Res>, S: Service> Listener<S> for T {}
