//! Transports move typed messages between a client and a server
//!
//! A transport has a client end, the [`Connector`], and a server end, the
//! [`Listener`]. Every call runs on its own bidirectional channel: the client
//! [opens](Connector::open) one, the server [accepts](Listener::accept) it, and
//! both get a send half and a receive half.
//!
//! Transports know nothing about services. They only know the type of the
//! messages going in and out, called `In` and `Out` from the point of view of
//! each end. The channel halves are declared through [`StreamTypes`] and the
//! possible failures through [`ConnectionErrors`].
use std::{
    fmt::{self, Debug, Display},
    net::SocketAddr,
};

use futures_lite::{Future, Stream};
use futures_sink::Sink;

use crate::{RpcError, RpcMessage};

#[cfg(feature = "flume-transport")]
#[cfg_attr(magicmath_docsrs, doc(cfg(feature = "flume-transport")))]
pub mod flume;
#[cfg(feature = "tcp-transport")]
#[cfg_attr(magicmath_docsrs, doc(cfg(feature = "tcp-transport")))]
pub mod tcp;

#[cfg(feature = "tcp-transport")]
mod util;

/// What can go wrong on either end of a transport.
pub trait ConnectionErrors: Debug + Clone + Send + Sync + 'static {
    /// Sending on a channel failed
    type SendError: RpcError;
    /// Receiving on a channel failed
    type RecvError: RpcError;
    /// A client could not open a channel
    type OpenError: RpcError;
    /// A server could not accept a channel
    type AcceptError: RpcError;
}

/// The message and channel types of one end of a transport.
pub trait StreamTypes: ConnectionErrors {
    /// Messages arriving at this end
    type In: RpcMessage;
    /// Messages leaving this end
    type Out: RpcMessage;
    /// Receive half of a channel
    type RecvStream: Stream<Item = Result<Self::In, Self::RecvError>>
        + Send
        + Sync
        + Unpin
        + 'static;
    /// Send half of a channel
    type SendSink: Sink<Self::Out, Error = Self::SendError> + Send + Sync + Unpin + 'static;
}

/// Client end of a transport.
pub trait Connector: StreamTypes {
    /// Open a new channel to the server.
    fn open(
        &self,
    ) -> impl Future<Output = Result<(Self::SendSink, Self::RecvStream), Self::OpenError>> + Send;
}

/// Server end of a transport.
pub trait Listener: StreamTypes {
    /// Wait for the next channel opened by any client.
    fn accept(
        &self,
    ) -> impl Future<Output = Result<(Self::SendSink, Self::RecvStream), Self::AcceptError>> + Send;

    /// Where this listener can be reached.
    fn local_addr(&self) -> &[LocalAddr];
}

/// An address a [Listener] is reachable at.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LocalAddr {
    /// A socket address
    Socket(SocketAddr),
    /// Inside this process
    Mem,
}

impl Display for LocalAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LocalAddr::Socket(addr) => write!(f, "{addr}"),
            LocalAddr::Mem => write!(f, "mem"),
        }
    }
}
