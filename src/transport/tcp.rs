//! TCP transport
//!
//! A [TcpConnector] keeps one TCP connection to the server and runs every call
//! as a numbered stream on it, so a burst of calls shares a single connection.
//! Frames are length delimited and postcard encoded. Each frame carries either
//! a message of one call or the end of one call.
//!
//! On the server, a background task accepts connections and hands every new
//! call to [TcpListener::accept](Listener::accept), no matter which connection
//! it arrived on.
use std::{
    collections::HashMap,
    fmt, io,
    net::SocketAddr,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures_lite::{Stream, StreamExt};
use futures_sink::Sink;
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::Mutex,
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use super::{
    util::{framed_read, framed_write},
    ConnectionErrors, Connector, Listener, LocalAddr, StreamTypes,
};
use crate::RpcMessage;

/// Messages buffered per call and direction. A call carries one message each way.
const CALL_CAPACITY: usize = 2;

/// Calls that arrived on some connection but were not accepted yet.
const ACCEPT_BACKLOG: usize = 128;

/// Pause after an accept error that is not about a single connection, such as
/// running out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
enum Frame<T> {
    /// A message of the call `id`
    Msg { id: u64, msg: T },
    /// The sending side is done with the call `id`
    Close { id: u64 },
}

fn connection_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
}

/// Send half of a call.
///
/// Dropping it tells the other side that this side is done with the call.
pub struct SendSink<Out: RpcMessage> {
    id: u64,
    outbox: flume::r#async::SendSink<'static, Frame<Out>>,
}

impl<Out: RpcMessage> SendSink<Out> {
    fn new(id: u64, outbox: flume::Sender<Frame<Out>>) -> Self {
        Self {
            id,
            outbox: outbox.into_sink(),
        }
    }
}

impl<Out: RpcMessage> fmt::Debug for SendSink<Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendSink").field("id", &self.id).finish()
    }
}

impl<Out: RpcMessage> Sink<Out> for SendSink<Out> {
    type Error = io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.outbox)
            .poll_ready(cx)
            .map_err(|_| connection_closed())
    }

    fn start_send(mut self: Pin<&mut Self>, msg: Out) -> io::Result<()> {
        let id = self.id;
        Pin::new(&mut self.outbox)
            .start_send(Frame::Msg { id, msg })
            .map_err(|_| connection_closed())
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.outbox)
            .poll_flush(cx)
            .map_err(|_| connection_closed())
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.outbox)
            .poll_close(cx)
            .map_err(|_| connection_closed())
    }
}

impl<Out: RpcMessage> Drop for SendSink<Out> {
    fn drop(&mut self) {
        // the outbox is unbounded, this only fails once the connection is gone
        self.outbox
            .sender()
            .try_send(Frame::Close { id: self.id })
            .ok();
    }
}

/// Receive half of a call.
///
/// Ends when the other side is done with the call or the connection is lost.
pub struct RecvStream<In: RpcMessage>(flume::r#async::RecvStream<'static, In>);

impl<In: RpcMessage> fmt::Debug for RecvStream<In> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecvStream").finish_non_exhaustive()
    }
}

impl<In: RpcMessage> Stream for RecvStream<In> {
    type Item = io::Result<In>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx).map(|msg| msg.map(Ok))
    }
}

type Socket<In, Out> = (SendSink<Out>, RecvStream<In>);

fn call<In: RpcMessage, Out: RpcMessage>(
    id: u64,
    outbox: flume::Sender<Frame<Out>>,
    inbox: flume::Receiver<In>,
) -> Socket<In, Out> {
    (SendSink::new(id, outbox), RecvStream(inbox.into_stream()))
}

fn split(stream: TcpStream) -> io::Result<(OwnedReadHalf, OwnedWriteHalf)> {
    // requests and responses are tiny, don't let nagle hold them back
    stream.set_nodelay(true)?;
    Ok(stream.into_split())
}

/// Write queued frames until every sender is gone.
async fn write_frames<Out: RpcMessage>(
    write: OwnedWriteHalf,
    queued: flume::Receiver<Frame<Out>>,
) -> io::Result<()> {
    let mut frames = framed_write::<_, Frame<Out>>(write);
    while let Ok(frame) = queued.recv_async().await {
        frames.feed(frame).await?;
        if queued.is_empty() {
            frames.flush().await?;
        }
    }
    frames.close().await
}

/// How long to wait before accepting again after `cause`.
///
/// Errors about a single connection are retried right away, anything else
/// after [ACCEPT_ERROR_BACKOFF]. Accepting is never given up.
fn accept_backoff(cause: &io::Error) -> Duration {
    match cause.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted => Duration::ZERO,
        _ => ACCEPT_ERROR_BACKOFF,
    }
}

async fn accept_connections<In: RpcMessage, Out: RpcMessage>(
    listener: tokio::net::TcpListener,
    incoming: flume::Sender<Socket<In, Out>>,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(cause) => {
                let backoff = accept_backoff(&cause);
                if backoff.is_zero() {
                    debug!(%cause, "accept failed");
                } else {
                    warn!(%cause, ?backoff, "accept failed, pausing");
                }
                tokio::time::sleep(backoff).await;
                continue;
            }
        };
        trace!(%remote, "accepted connection");
        let incoming = incoming.clone();
        tokio::task::spawn(async move {
            match serve_connection(stream, incoming).await {
                Ok(()) => trace!(%remote, "connection closed"),
                Err(cause) => debug!(%remote, %cause, "connection failed"),
            }
        });
    }
}

/// Split the calls of one client connection out to the listener.
async fn serve_connection<In: RpcMessage, Out: RpcMessage>(
    stream: TcpStream,
    incoming: flume::Sender<Socket<In, Out>>,
) -> io::Result<()> {
    let (read, write) = split(stream)?;
    let (outbox, queued) = flume::unbounded();
    let read_calls = async move {
        let mut frames = framed_read::<_, Frame<In>>(read);
        let mut calls: HashMap<u64, flume::Sender<In>> = HashMap::new();
        while let Some(frame) = frames.next().await {
            match frame? {
                Frame::Msg { id, msg } => match calls.get(&id) {
                    Some(inbox) => {
                        if inbox.send_async(msg).await.is_err() {
                            calls.remove(&id);
                        }
                    }
                    None => {
                        let (inbox, recv) = flume::bounded(CALL_CAPACITY);
                        // fresh channel, there is room
                        inbox.try_send(msg).ok();
                        calls.insert(id, inbox);
                        let socket = call(id, outbox.clone(), recv);
                        if incoming.send_async(socket).await.is_err() {
                            debug!("listener dropped");
                            return Ok(());
                        }
                    }
                },
                Frame::Close { id } => {
                    // ends the receive half, which cancels the call if it is still running
                    calls.remove(&id);
                }
            }
        }
        io::Result::Ok(())
    };
    tokio::select! {
        res = read_calls => res,
        res = write_frames(write, queued) => res,
    }
}

struct ListenerInner<In: RpcMessage, Out: RpcMessage> {
    local_addr: [LocalAddr; 1],
    incoming: flume::Receiver<Socket<In, Out>>,
    task: JoinHandle<()>,
}

impl<In: RpcMessage, Out: RpcMessage> Drop for ListenerInner<In, Out> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Server end of the tcp transport.
pub struct TcpListener<In: RpcMessage, Out: RpcMessage> {
    inner: Arc<ListenerInner<In, Out>>,
}

impl<In: RpcMessage, Out: RpcMessage> TcpListener<In, Out> {
    /// Bind a new listener to the given socket address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Self::new(inner)
    }

    /// Start accepting connections on an already bound tokio listener.
    ///
    /// Must be called from within a tokio runtime. Accepting stops when the
    /// last clone of the returned listener is dropped.
    pub fn new(listener: tokio::net::TcpListener) -> io::Result<Self> {
        let local_addr = listener.local_addr()?;
        let (send, incoming) = flume::bounded(ACCEPT_BACKLOG);
        let task = tokio::task::spawn(accept_connections(listener, send));
        Ok(Self {
            inner: Arc::new(ListenerInner {
                local_addr: [LocalAddr::Socket(local_addr)],
                incoming,
                task,
            }),
        })
    }
}

impl<In: RpcMessage, Out: RpcMessage> Clone for TcpListener<In, Out> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<In: RpcMessage, Out: RpcMessage> fmt::Debug for TcpListener<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpListener")
            .field("local_addr", &self.inner.local_addr)
            .finish()
    }
}

impl<In: RpcMessage, Out: RpcMessage> ConnectionErrors for TcpListener<In, Out> {
    type SendError = io::Error;
    type RecvError = io::Error;
    type OpenError = io::Error;
    type AcceptError = io::Error;
}

impl<In: RpcMessage, Out: RpcMessage> StreamTypes for TcpListener<In, Out> {
    type In = In;
    type Out = Out;
    type SendSink = SendSink<Out>;
    type RecvStream = RecvStream<In>;
}

impl<In: RpcMessage, Out: RpcMessage> Listener for TcpListener<In, Out> {
    async fn accept(&self) -> io::Result<Socket<In, Out>> {
        // only fails once the accept task is gone, e.g. on runtime shutdown
        self.inner
            .incoming
            .recv_async()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "listener closed"))
    }

    fn local_addr(&self) -> &[LocalAddr] {
        &self.inner.local_addr
    }
}

type Calls<In> = Arc<Mutex<HashMap<u64, flume::Sender<In>>>>;

/// One live connection of a [TcpConnector].
struct ConnectionInner<In: RpcMessage, Out: RpcMessage> {
    outbox: flume::Sender<Frame<Out>>,
    calls: Calls<In>,
    next_id: AtomicU64,
    task: JoinHandle<()>,
}

impl<In: RpcMessage, Out: RpcMessage> ConnectionInner<In, Out> {
    fn spawn(stream: TcpStream) -> io::Result<Self> {
        let (read, write) = split(stream)?;
        let (outbox, queued) = flume::unbounded();
        let calls = Calls::default();
        let task = tokio::task::spawn(drive_connection(read, write, queued, Arc::clone(&calls)));
        Ok(Self {
            outbox,
            calls,
            next_id: AtomicU64::new(0),
            task,
        })
    }

    fn is_closed(&self) -> bool {
        self.task.is_finished()
    }
}

impl<In: RpcMessage, Out: RpcMessage> Drop for ConnectionInner<In, Out> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive_connection<In: RpcMessage, Out: RpcMessage>(
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    queued: flume::Receiver<Frame<Out>>,
    calls: Calls<In>,
) {
    let read_calls = calls.clone();
    let read_responses = async move {
        let calls = read_calls;
        let mut frames = framed_read::<_, Frame<In>>(read);
        while let Some(frame) = frames.next().await {
            match frame? {
                Frame::Msg { id, msg } => {
                    let inbox = calls.lock().await.get(&id).cloned();
                    if let Some(inbox) = inbox {
                        // the caller may have given up already
                        inbox.send_async(msg).await.ok();
                    }
                }
                Frame::Close { id } => {
                    calls.lock().await.remove(&id);
                }
            }
        }
        io::Result::Ok(())
    };
    let res = tokio::select! {
        res = read_responses => res,
        res = write_frames(write, queued) => res,
    };
    match res {
        Ok(()) => debug!("connection closed"),
        Err(cause) => debug!(%cause, "connection failed"),
    }
    // ends the receive half of every call still waiting
    calls.lock().await.clear();
}

/// Client end of the tcp transport.
///
/// Connects on the first call and reconnects on the next call after the
/// connection was lost. Clones share the connection.
pub struct TcpConnector<In: RpcMessage, Out: RpcMessage> {
    addr: SocketAddr,
    connection: Arc<Mutex<Option<Arc<ConnectionInner<In, Out>>>>>,
}

impl<In: RpcMessage, Out: RpcMessage> TcpConnector<In, Out> {
    /// Create a connector for the server at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connection: Default::default(),
        }
    }

    async fn connection(&self) -> io::Result<Arc<ConnectionInner<In, Out>>> {
        let mut current = self.connection.lock().await;
        if let Some(conn) = current.as_ref().filter(|conn| !conn.is_closed()) {
            return Ok(conn.clone());
        }
        let stream = TcpStream::connect(self.addr).await.map_err(|cause| {
            debug!(addr = %self.addr, %cause, "connect failed");
            cause
        })?;
        trace!(addr = %self.addr, "connected");
        let conn = Arc::new(ConnectionInner::spawn(stream)?);
        *current = Some(conn.clone());
        Ok(conn)
    }
}

impl<In: RpcMessage, Out: RpcMessage> Clone for TcpConnector<In, Out> {
    fn clone(&self) -> Self {
        Self {
            addr: self.addr,
            connection: self.connection.clone(),
        }
    }
}

impl<In: RpcMessage, Out: RpcMessage> fmt::Debug for TcpConnector<In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnector")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl<In: RpcMessage, Out: RpcMessage> ConnectionErrors for TcpConnector<In, Out> {
    type SendError = io::Error;
    type RecvError = io::Error;
    type OpenError = io::Error;
    type AcceptError = io::Error;
}

impl<In: RpcMessage, Out: RpcMessage> StreamTypes for TcpConnector<In, Out> {
    type In = In;
    type Out = Out;
    type SendSink = SendSink<Out>;
    type RecvStream = RecvStream<In>;
}

impl<In: RpcMessage, Out: RpcMessage> Connector for TcpConnector<In, Out> {
    async fn open(&self) -> io::Result<Socket<In, Out>> {
        let conn = self.connection().await?;
        let id = conn.next_id.fetch_add(1, Ordering::Relaxed);
        let (inbox, recv) = flume::bounded(CALL_CAPACITY);
        conn.calls.lock().await.insert(id, inbox);
        Ok(call(id, conn.outbox.clone(), recv))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_retried_at_once() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(accept_backoff(&kind.into()), Duration::ZERO);
        }
    }

    #[cfg(unix)]
    #[test]
    fn running_out_of_descriptors_pauses() {
        // EMFILE and ENFILE
        for code in [24, 23] {
            let cause = io::Error::from_raw_os_error(code);
            assert_eq!(accept_backoff(&cause), ACCEPT_ERROR_BACKOFF);
        }
    }

    #[tokio::test]
    async fn calls_share_one_connection() -> testresult::TestResult<()> {
        let listener = TcpListener::<u64, u64>::bind("127.0.0.1:0".parse()?).await?;
        let [LocalAddr::Socket(addr)] = listener.local_addr() else {
            panic!("not a socket address");
        };
        let connector = TcpConnector::<u64, u64>::new(*addr);

        let (mut send_a, mut recv_a) = connector.open().await?;
        let (mut send_b, mut recv_b) = connector.open().await?;
        send_a.send(1).await?;
        send_b.send(2).await?;

        for _ in 0..2 {
            let (mut send, mut recv) = listener.accept().await?;
            let n = recv.next().await.transpose()?.unwrap_or_default();
            send.send(n * 10).await?;
        }
        assert_eq!(recv_a.next().await.transpose()?, Some(10));
        assert_eq!(recv_b.next().await.transpose()?, Some(20));

        let first = connector.connection().await?;
        let again = connector.connection().await?;
        assert!(Arc::ptr_eq(&first, &again));
        Ok(())
    }

    #[tokio::test]
    async fn dropping_the_send_half_ends_the_call() -> testresult::TestResult<()> {
        let listener = TcpListener::<u64, u64>::bind("127.0.0.1:0".parse()?).await?;
        let [LocalAddr::Socket(addr)] = listener.local_addr() else {
            panic!("not a socket address");
        };
        let connector = TcpConnector::<u64, u64>::new(*addr);
        let (mut send, _recv) = connector.open().await?;
        send.send(7).await?;
        let (_server_send, mut server_recv) = listener.accept().await?;
        assert_eq!(server_recv.next().await.transpose()?, Some(7));
        drop(send);
        assert!(server_recv.next().await.is_none());
        Ok(())
    }
}
