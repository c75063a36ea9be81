//! In memory transport built on [flume] channels
//!
//! [channel] creates a rendezvous channel shared by a [FlumeListener] and any
//! number of [FlumeConnector] clones. Opening a channel creates a fresh pair of
//! bounded flume channels, keeps one end and pushes the other end through the
//! rendezvous channel, where the listener picks it up.
//!
//! Nothing is serialized, messages are moved between tasks as they are.
//!
//! [flume]: https://docs.rs/flume/
use std::{
    convert::Infallible,
    fmt, error,
    pin::Pin,
    task::{Context, Poll},
};

use derive_more::Display;
use futures_lite::Stream;
use futures_sink::Sink;
use pin_project::pin_project;

use super::{ConnectionErrors, Connector, Listener, LocalAddr, StreamTypes};
use crate::RpcMessage;

/// Capacity of the per call channels in each direction.
///
/// A call only ever carries one message each way.
const CHANNEL_CAPACITY: usize = 2;

/// The other end of a flume channel is gone.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Closed {
    /// The listener was dropped before it accepted the call
    #[display("listener dropped")]
    Listener,
    /// All connectors were dropped, no more calls will arrive
    #[display("all connectors dropped")]
    Connectors,
    /// The receiving half of a call was dropped
    #[display("receiver dropped")]
    Receiver,
}

impl error::Error for Closed {}

/// Sending half of a call.
#[pin_project]
pub struct SendSink<T: RpcMessage>(#[pin] flume::r#async::SendSink<'static, T>);

impl<T: RpcMessage> fmt::Debug for SendSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendSink").finish_non_exhaustive()
    }
}

impl<T: RpcMessage> Sink<T> for SendSink<T> {
    type Error = Closed;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Closed>> {
        self.project().0.poll_ready(cx).map_err(|_| Closed::Receiver)
    }

    fn start_send(self: Pin<&mut Self>, item: T) -> Result<(), Closed> {
        self.project().0.start_send(item).map_err(|_| Closed::Receiver)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Closed>> {
        self.project().0.poll_flush(cx).map_err(|_| Closed::Receiver)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Closed>> {
        self.project().0.poll_close(cx).map_err(|_| Closed::Receiver)
    }
}

/// Receiving half of a call.
///
/// Ends when the sending half is dropped. Receiving itself never fails.
#[pin_project]
pub struct RecvStream<T: RpcMessage>(#[pin] flume::r#async::RecvStream<'static, T>);

impl<T: RpcMessage> fmt::Debug for RecvStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvStream").finish_non_exhaustive()
    }
}

impl<T: RpcMessage> Stream for RecvStream<T> {
    type Item = Result<T, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().0.poll_next(cx).map(|item| item.map(Ok))
    }
}

type Socket<In, Out> = (SendSink<Out>, RecvStream<In>);

fn socket<In: RpcMessage, Out: RpcMessage>(
    send: flume::Sender<Out>,
    recv: flume::Receiver<In>,
) -> Socket<In, Out> {
    (SendSink(send.into_sink()), RecvStream(recv.into_stream()))
}

/// Server end of a flume transport, created with [channel].
pub struct FlumeListener<In: RpcMessage, Out: RpcMessage> {
    incoming: flume::Receiver<Socket<In, Out>>,
}

impl<In: RpcMessage, Out: RpcMessage> Clone for FlumeListener<In, Out> {
    fn clone(&self) -> Self {
        Self {
            incoming: self.incoming.clone(),
        }
    }
}

impl<In: RpcMessage, Out: RpcMessage> fmt::Debug for FlumeListener<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlumeListener")
            .field("pending", &self.incoming.len())
            .finish()
    }
}

impl<In: RpcMessage, Out: RpcMessage> ConnectionErrors for FlumeListener<In, Out> {
    type SendError = Closed;
    type RecvError = Infallible;
    type OpenError = Closed;
    type AcceptError = Closed;
}

impl<In: RpcMessage, Out: RpcMessage> StreamTypes for FlumeListener<In, Out> {
    type In = In;
    type Out = Out;
    type SendSink = SendSink<Out>;
    type RecvStream = RecvStream<In>;
}

impl<In: RpcMessage, Out: RpcMessage> Listener for FlumeListener<In, Out> {
    async fn accept(&self) -> Result<Socket<In, Out>, Closed> {
        self.incoming
            .recv_async()
            .await
            .map_err(|_| Closed::Connectors)
    }

    fn local_addr(&self) -> &[LocalAddr] {
        &[LocalAddr::Mem]
    }
}

/// Client end of a flume transport, created with [channel].
///
/// Clones share the rendezvous channel and talk to the same listener.
pub struct FlumeConnector<In: RpcMessage, Out: RpcMessage> {
    outgoing: flume::Sender<Socket<Out, In>>,
}

impl<In: RpcMessage, Out: RpcMessage> Clone for FlumeConnector<In, Out> {
    fn clone(&self) -> Self {
        Self {
            outgoing: self.outgoing.clone(),
        }
    }
}

impl<In: RpcMessage, Out: RpcMessage> fmt::Debug for FlumeConnector<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlumeConnector")
            .field("closed", &self.outgoing.is_disconnected())
            .finish()
    }
}

impl<In: RpcMessage, Out: RpcMessage> ConnectionErrors for FlumeConnector<In, Out> {
    type SendError = Closed;
    type RecvError = Infallible;
    type OpenError = Closed;
    type AcceptError = Closed;
}

impl<In: RpcMessage, Out: RpcMessage> StreamTypes for FlumeConnector<In, Out> {
    type In = In;
    type Out = Out;
    type SendSink = SendSink<Out>;
    type RecvStream = RecvStream<In>;
}

impl<In: RpcMessage, Out: RpcMessage> Connector for FlumeConnector<In, Out> {
    async fn open(&self) -> Result<Socket<In, Out>, Closed> {
        let (req_send, req_recv) = flume::bounded::<Out>(CHANNEL_CAPACITY);
        let (res_send, res_recv) = flume::bounded::<In>(CHANNEL_CAPACITY);
        self.outgoing
            .send_async(socket(res_send, req_recv))
            .await
            .map_err(|_| Closed::Listener)?;
        Ok(socket(req_send, res_recv))
    }
}

/// Create a connected listener and connector.
///
/// `buffer` bounds the number of opened but not yet accepted calls. Opening
/// more waits until the listener catches up.
pub fn channel<Req: RpcMessage, Res: RpcMessage>(
    buffer: usize,
) -> (FlumeListener<Req, Res>, FlumeConnector<Res, Req>) {
    let (outgoing, incoming) = flume::bounded(buffer);
    (FlumeListener { incoming }, FlumeConnector { outgoing })
}
