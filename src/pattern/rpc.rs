//! Request/response calls
//!
//! The client opens a channel, sends one request and waits for one response.
//! The server reads the request, runs a handler and sends its result back. If
//! the client closes its side while the handler runs, the handler is dropped.
use std::{error, fmt, result, time::Duration};

use futures_lite::{Future, StreamExt};
use futures_util::{FutureExt, SinkExt};
use tracing::trace;

use crate::{
    message::{InteractionPattern, Msg},
    server::{race2, RpcChannel, RpcServerError},
    transport::ConnectionErrors,
    Connector, Listener, RpcClient, Service,
};

/// One request, one response.
#[derive(Debug, Clone, Copy)]
pub struct Rpc;
impl InteractionPattern for Rpc {}

/// A request answered by a single [RpcMsg::Response].
pub trait RpcMsg<S: Service>: Msg<S, Pattern = Rpc> {
    type Response: Into<S::Res> + TryFrom<S::Res> + Send + 'static;
}

impl<T: RpcMsg<S>, S: Service> Msg<S> for T {
    type Pattern = Rpc;
}

/// Why a call failed on the client side.
#[derive(Debug)]
pub enum Error<C: ConnectionErrors> {
    /// No channel could be opened
    Open(C::OpenError),
    /// The request could not be sent
    Send(C::SendError),
    /// The server closed the channel without answering
    EarlyClose,
    /// Receiving the response failed
    RecvError(C::RecvError),
    /// The server answered with the wrong response type
    DowncastError,
    /// No response arrived before the deadline of the call
    ///
    /// The server may or may not have handled the request.
    Timeout,
}

impl<C: ConnectionErrors> fmt::Display for Error<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(cause) => write!(f, "opening a channel failed: {cause}"),
            Self::Send(cause) => write!(f, "sending the request failed: {cause}"),
            Self::EarlyClose => write!(f, "server closed the channel without a response"),
            Self::RecvError(cause) => write!(f, "receiving the response failed: {cause}"),
            Self::DowncastError => write!(f, "unexpected response type"),
            Self::Timeout => write!(f, "deadline elapsed"),
        }
    }
}

impl<C: ConnectionErrors> error::Error for Error<C> {}

impl<S, C> RpcClient<S, C>
where
    S: Service,
    C: Connector<S>,
{
    /// Send `msg` and wait for its response.
    pub async fn rpc<M>(&self, msg: M) -> result::Result<M::Response, Error<C>>
    where
        M: RpcMsg<S>,
    {
        let msg: S::Req = msg.into();
        trace!(?msg, "rpc");
        let (mut send, mut recv) = self.source.open().await.map_err(Error::Open)?;
        send.send(msg).await.map_err(Error::<C>::Send)?;
        let res = recv
            .next()
            .await
            .ok_or(Error::<C>::EarlyClose)?
            .map_err(Error::<C>::RecvError)?;
        // the server treats a closed send half as a cancellation
        drop(send);
        M::Response::try_from(res).map_err(|_| Error::DowncastError)
    }

    /// Like [RpcClient::rpc], but gives up after `timeout`.
    ///
    /// Giving up drops the channel, which cancels the handler on the server.
    /// Whatever the handler already did stays done.
    pub async fn rpc_with_timeout<M>(
        &self,
        msg: M,
        timeout: Duration,
    ) -> result::Result<M::Response, Error<C>>
    where
        M: RpcMsg<S>,
    {
        tokio::time::timeout(timeout, self.rpc(msg))
            .await
            .map_err(|_| Error::Timeout)?
    }
}

impl<S, C> RpcChannel<S, C>
where
    S: Service,
    C: Listener<S>,
{
    /// Answer `req` with the result of `f(target, req)`.
    ///
    /// Runs until the response is sent or the client cancels. Spawn it to
    /// serve calls concurrently.
    pub async fn rpc<M, F, Fut, T>(
        self,
        req: M,
        target: T,
        f: F,
    ) -> result::Result<(), RpcServerError<C>>
    where
        M: RpcMsg<S>,
        F: FnOnce(T, M) -> Fut,
        Fut: Future<Output = M::Response>,
        T: Send + 'static,
    {
        let Self {
            mut send, mut recv, ..
        } = self;
        // any further message, or the end of the stream, cancels the call
        let cancel = recv
            .next()
            .map(|_| Err(RpcServerError::UnexpectedUpdateMessage::<C>));
        let respond = async move {
            let res: S::Res = f(target, req).await.into();
            send.send(res).await.map_err(RpcServerError::SendError)
        };
        race2(cancel, respond).await
    }
}
