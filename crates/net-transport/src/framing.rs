//! Length-delimited framing
//!
//! Frame layout: `[u32 big-endian length][payload]`. Each protocol step sets
//! its own maximum payload size on the codec.

use std::io;

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec, LengthDelimitedCodecError};

use crate::{TransportError, TransportResult};

/// Byte stream wrapped in the length-delimited codec
pub type FramedStream<S> = Framed<S, LengthDelimitedCodec>;

/// Wrap a byte stream with 4-byte big-endian length framing
pub fn framed<S>(stream: S, max_frame_length: usize) -> FramedStream<S>
where
    S: AsyncRead + AsyncWrite,
{
    let codec = LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec();
    Framed::new(stream, codec)
}

/// Change the accepted frame size for the next protocol step
pub fn set_frame_limit<S>(framed: &mut FramedStream<S>, max_frame_length: usize) {
    framed.codec_mut().set_max_frame_length(max_frame_length);
}

/// Read one frame; `Ok(None)` means the peer closed the stream cleanly
pub async fn read_frame<St>(stream: &mut St, max: usize) -> TransportResult<Option<BytesMut>>
where
    St: Stream<Item = io::Result<BytesMut>> + Unpin,
{
    match stream.next().await {
        Some(Ok(frame)) => Ok(Some(frame)),
        Some(Err(e)) => Err(map_frame_error(e, max)),
        None => Ok(None),
    }
}

/// Write one frame after checking it against `max`
pub async fn write_frame<Si>(sink: &mut Si, payload: Bytes, max: usize) -> TransportResult<()>
where
    Si: Sink<Bytes, Error = io::Error> + Unpin,
{
    if payload.len() > max {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max,
        });
    }
    sink.send(payload).await.map_err(|e| map_frame_error(e, max))
}

fn map_frame_error(error: io::Error, max: usize) -> TransportError {
    let oversized = error
        .get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>());

    if oversized {
        // The codec does not report the announced length
        TransportError::FrameLimitExceeded { max }
    } else {
        TransportError::Io(error)
    }
}
