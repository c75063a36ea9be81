//! Client side of the rpc layer
//!
//! [RpcClient] turns a [Connector] into something that can make calls to a
//! [Service]. The calls themselves live in [crate::pattern::rpc].
use std::marker::PhantomData;

use crate::{Connector, Service};

/// [crate::transport::flume::FlumeConnector] typed for the service `S`
#[cfg(feature = "flume-transport")]
#[cfg_attr(magicmath_docsrs, doc(cfg(feature = "flume-transport")))]
pub type FlumeConnector<S> =
    crate::transport::flume::FlumeConnector<<S as Service>::Res, <S as Service>::Req>;

/// [crate::transport::tcp::TcpConnector] typed for the service `S`
#[cfg(feature = "tcp-transport")]
#[cfg_attr(magicmath_docsrs, doc(cfg(feature = "tcp-transport")))]
pub type TcpConnector<S> =
    crate::transport::tcp::TcpConnector<<S as Service>::Res, <S as Service>::Req>;

/// Makes calls to the service `S` over the connector `C`.
///
/// Cloning is as cheap as cloning the connector, and clones can make calls
/// concurrently.
#[derive(Debug)]
pub struct RpcClient<S, C> {
    pub(crate) source: C,
    pub(crate) _p: PhantomData<S>,
}

impl<S, C: Clone> Clone for RpcClient<S, C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            _p: PhantomData,
        }
    }
}

impl<S, C> RpcClient<S, C>
where
    S: Service,
    C: Connector<S>,
{
    pub fn new(source: C) -> Self {
        Self {
            source,
            _p: PhantomData,
        }
    }
}
