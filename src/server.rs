//! Server side of the rpc layer
//!
//! [RpcServer::accept] waits for a client to open a channel,
//! [Accepting::read_first] reads the request, and the returned [RpcChannel] is
//! used to answer it.
use std::{
    error,
    fmt::{self, Debug},
    marker::PhantomData,
    result,
};

use futures_lite::{Future, StreamExt};
use tracing::debug;

use crate::{
    transport::{ConnectionErrors, StreamTypes},
    Listener, Service,
};

/// Accepts calls to the service `S` from the listener `C`.
#[derive(Debug)]
pub struct RpcServer<S, C> {
    source: C,
    _p: PhantomData<S>,
}

impl<S, C: Clone> Clone for RpcServer<S, C> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            _p: PhantomData,
        }
    }
}

impl<S: Service, C: Listener<S>> RpcServer<S, C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            _p: PhantomData,
        }
    }

    /// Wait for the next call.
    ///
    /// This returns as soon as a channel is open, before the request has
    /// arrived, so the accept loop is never blocked by a slow client.
    pub async fn accept(&self) -> result::Result<Accepting<S, C>, RpcServerError<C>> {
        let (send, recv) = self.source.accept().await.map_err(|cause| {
            debug!(%cause, "accept failed");
            RpcServerError::Accept(cause)
        })?;
        Ok(Accepting {
            send,
            recv,
            _p: PhantomData,
        })
    }

    /// The listener this server accepts calls from.
    pub fn listener(&self) -> &C {
        &self.source
    }
}

/// The two halves of an accepted channel, typed for the service `S`.
pub struct RpcChannel<S: Service, C: StreamTypes> {
    /// Responses go here
    pub send: C::SendSink,
    /// Further client messages arrive here, there should be none
    pub recv: C::RecvStream,
    _p: PhantomData<S>,
}

impl<S: Service, C: StreamTypes> Debug for RpcChannel<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel").finish_non_exhaustive()
    }
}

/// An accepted channel whose request has not been read yet.
pub struct Accepting<S: Service, C: Listener<S>> {
    send: C::SendSink,
    recv: C::RecvStream,
    _p: PhantomData<S>,
}

impl<S: Service, C: Listener<S>> Debug for Accepting<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accepting").finish_non_exhaustive()
    }
}

impl<S: Service, C: Listener<S>> Accepting<S, C> {
    /// Read the request and hand back the channel to answer it on.
    pub async fn read_first(self) -> result::Result<(S::Req, RpcChannel<S, C>), RpcServerError<C>> {
        let Accepting { send, mut recv, .. } = self;
        let request = recv
            .next()
            .await
            .ok_or(RpcServerError::EarlyClose)?
            .map_err(RpcServerError::RecvError)?;
        let chan = RpcChannel {
            send,
            recv,
            _p: PhantomData,
        };
        Ok((request, chan))
    }
}

/// Failure while serving a call.
#[derive(Debug)]
pub enum RpcServerError<C: ConnectionErrors> {
    /// The listener failed, no more calls can be accepted
    Accept(C::AcceptError),
    /// The client went away before sending its request
    EarlyClose,
    /// Receiving the request failed
    RecvError(C::RecvError),
    /// Sending the response failed
    SendError(C::SendError),
    /// The client sent something after its request, or closed the channel
    /// before the response was ready
    UnexpectedUpdateMessage,
}

impl<C: ConnectionErrors> fmt::Display for RpcServerError<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept(cause) => write!(f, "accept failed: {cause}"),
            Self::EarlyClose => write!(f, "channel closed before the request arrived"),
            Self::RecvError(cause) => write!(f, "receiving the request failed: {cause}"),
            Self::SendError(cause) => write!(f, "sending the response failed: {cause}"),
            Self::UnexpectedUpdateMessage => write!(f, "call cancelled by the client"),
        }
    }
}

impl<C: ConnectionErrors> error::Error for RpcServerError<C> {}

/// Run two futures, return the output of whichever finishes first.
pub(crate) async fn race2<T, A: Future<Output = T>, B: Future<Output = T>>(f1: A, f2: B) -> T {
    tokio::select! {
        x = f1 => x,
        x = f2 => x,
    }
}
