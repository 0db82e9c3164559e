// Frame reads and writes on QUIC stream halves, classified into stream errors.
use anyhow::{Context, anyhow};
use bytes::{Bytes, BytesMut};
use flow_wire::{Frame, FrameHeader};
use quinn::{ReadExactError, RecvStream, SendStream, WriteError};

use crate::StreamError;

// Returns `Ok(None)` when the peer finished the stream on a frame boundary.
pub(crate) async fn read_frame_limited_into(
    recv: &mut RecvStream,
    max_payload_bytes: usize,
    scratch: &mut BytesMut,
) -> Result<Option<Frame>, StreamError> {
    let mut header_bytes = [0u8; FrameHeader::LEN];
    match recv.read_exact(&mut header_bytes).await {
        Ok(()) => {}
        Err(ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(ReadExactError::FinishedEarly(read)) => {
            return Err(anyhow!("stream finished after {read} bytes of a frame header").into());
        }
        Err(ReadExactError::ReadError(err)) => {
            return Err(anyhow::Error::from(err).context("read frame header").into());
        }
    }

    let header = FrameHeader::decode(Bytes::copy_from_slice(&header_bytes))
        .context("decode frame header")?;
    let length = usize::try_from(header.length).context("frame length")?;
    if length > max_payload_bytes {
        return Err(anyhow!(
            "frame length {length} exceeds max_payload_bytes {max_payload_bytes}"
        )
        .into());
    }
    scratch.clear();
    scratch.resize(length, 0u8);
    recv.read_exact(&mut scratch[..])
        .await
        .context("read frame payload")?;
    Ok(Some(Frame {
        header,
        payload: scratch.split().freeze(),
    }))
}

pub(crate) async fn write_frame(send: &mut SendStream, frame: &Frame) -> Result<(), StreamError> {
    let mut header_bytes = [0u8; FrameHeader::LEN];
    frame.header.encode_into(&mut header_bytes);
    send.write_all(&header_bytes)
        .await
        .map_err(|err| classify_write(err, "write frame header"))?;
    send.write_all(&frame.payload)
        .await
        .map_err(|err| classify_write(err, "write frame payload"))?;
    Ok(())
}

// A peer that stopped reading has ended the stream; anything else broke the link.
fn classify_write(err: WriteError, op: &'static str) -> StreamError {
    match err {
        WriteError::Stopped(_) | WriteError::ClosedStream => StreamError::Eof,
        other => StreamError::Transport(anyhow::Error::from(other).context(op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_peer_is_end_of_stream() {
        let err = classify_write(WriteError::Stopped(quinn::VarInt::from_u32(0)), "write");
        assert!(err.is_eof());
    }

    #[test]
    fn lost_connection_is_transport_failure() {
        let err = classify_write(
            WriteError::ConnectionLost(quinn::ConnectionError::TimedOut),
            "write frame payload",
        );
        assert!(matches!(err, StreamError::Transport(_)));
        assert!(format!("{err:#}").contains("write frame payload"));
    }
}
