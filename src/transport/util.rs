//! Framing shared by the byte stream based transports
//!
//! A byte stream is turned into a stream of frames using a length delimited
//! codec, and each frame holds exactly one postcard encoded message.
use std::{io, marker::PhantomData, pin::Pin};

use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serde::{Deserializer, Serializer, SymmetricallyFramed};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Upper bound for a single encoded message.
///
/// All messages of this crate are a few dozen bytes, so anything close to this
/// limit is a broken or hostile peer.
pub(crate) const MAX_FRAME_LENGTH: usize = 1024 * 64;

/// A [tokio_serde] format that uses postcard.
#[derive(Debug)]
pub(crate) struct Postcard<T>(PhantomData<T>);

impl<T> Default for Postcard<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: DeserializeOwned> Deserializer<T> for Postcard<T> {
    type Error = io::Error;

    fn deserialize(self: Pin<&mut Self>, src: &BytesMut) -> Result<T, Self::Error> {
        postcard::from_bytes(src).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: Serialize> Serializer<T> for Postcard<T> {
    type Error = io::Error;

    fn serialize(self: Pin<&mut Self>, item: &T) -> Result<Bytes, Self::Error> {
        postcard::to_stdvec(item)
            .map(Bytes::from)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Write half of a framed postcard channel.
pub(crate) type FramedPostcardWrite<W, T> =
    SymmetricallyFramed<FramedWrite<W, LengthDelimitedCodec>, T, Postcard<T>>;

/// Read half of a framed postcard channel.
pub(crate) type FramedPostcardRead<R, T> =
    SymmetricallyFramed<FramedRead<R, LengthDelimitedCodec>, T, Postcard<T>>;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Wrap the write side of a byte stream so it accepts messages of type `T`.
pub(crate) fn framed_write<W: AsyncWrite, T: Serialize>(inner: W) -> FramedPostcardWrite<W, T> {
    // turn the AsyncWrite into a Sink of Bytes
    let framed = FramedWrite::new(inner, codec());
    // and the Sink of Bytes into a Sink of T
    SymmetricallyFramed::new(framed, Postcard::default())
}

/// Wrap the read side of a byte stream so it yields messages of type `T`.
pub(crate) fn framed_read<R: AsyncRead, T: DeserializeOwned>(inner: R) -> FramedPostcardRead<R, T> {
    let framed = FramedRead::new(inner, codec());
    SymmetricallyFramed::new(framed, Postcard::default())
}

#[cfg(test)]
mod tests {
    use futures_lite::StreamExt;
    use futures_util::SinkExt;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Frame {
        Pair(f64, f64),
        Triple(i64, i64, i64),
    }

    #[tokio::test]
    async fn frames_survive_a_duplex_pipe() -> testresult::TestResult<()> {
        let (a, b) = tokio::io::duplex(1024);
        let mut send = framed_write::<_, Frame>(a);
        let mut recv = framed_read::<_, Frame>(b);
        send.send(Frame::Pair(5.0, 2.0)).await?;
        send.send(Frame::Triple(5, -2, 3)).await?;
        drop(send);
        assert_eq!(recv.next().await.transpose()?, Some(Frame::Pair(5.0, 2.0)));
        assert_eq!(recv.next().await.transpose()?, Some(Frame::Triple(5, -2, 3)));
        assert!(recv.next().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn garbage_frame_is_invalid_data() {
        let (a, b) = tokio::io::duplex(1024);
        let mut raw = FramedWrite::new(a, codec());
        let mut recv = framed_read::<_, Frame>(b);
        raw.send(Bytes::from_static(&[0xff, 0xff, 0xff])).await.unwrap();
        let err = recv.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
