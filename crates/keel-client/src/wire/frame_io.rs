// Low-level frame IO for keel-wire over async byte streams.
use bytes::BytesMut;
use keel_wire::{Frame, FrameHeader, Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::runtime_config;
#[cfg(feature = "telemetry")]
use crate::counters::frame_counters;
use crate::error::{ClientError, Result};

pub(crate) async fn read_response<R>(
    recv: &mut R,
    frame_scratch: &mut BytesMut,
) -> Result<Option<Response>>
where
    R: AsyncRead + Unpin,
{
    let frame = match read_frame_into(recv, frame_scratch).await? {
        Some(frame) => frame,
        None => return Ok(None),
    };
    match Response::decode(frame) {
        Ok(response) => Ok(Some(response)),
        Err(err) => {
            #[cfg(feature = "telemetry")]
            {
                let counters = frame_counters();
                counters
                    .frames_in_err
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            Err(err.into())
        }
    }
}

pub(crate) async fn read_frame_into<R>(
    recv: &mut R,
    scratch: &mut BytesMut,
) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; FrameHeader::LEN];
    // A clean close between frames surfaces as zero bytes on the first read;
    // anything short after that is a truncated frame.
    let n = recv.read(&mut header_bytes).await.map_err(ClientError::io)?;
    if n == 0 {
        return Ok(None);
    }
    recv.read_exact(&mut header_bytes[n..])
        .await
        .map_err(ClientError::io)?;

    let header = FrameHeader::decode(&header_bytes)?;
    let length = header.length as usize;

    // Safety: we enforce a max frame size (`KEEL_MAX_FRAME_BYTES`) before allocating.
    let max_frame_bytes = runtime_config().max_frame_bytes;
    if length > max_frame_bytes {
        return Err(ClientError::Codec(format!(
            "frame too large: {length} bytes (cap {max_frame_bytes}); refusing"
        )));
    }

    // Reuse the scratch buffer to avoid per-frame allocations.
    scratch.clear();
    scratch.resize(length, 0u8);
    recv.read_exact(&mut scratch[..])
        .await
        .map_err(ClientError::io)?;

    let frame = Frame {
        header,
        payload: scratch.split().freeze(),
    };
    #[cfg(feature = "telemetry")]
    {
        let counters = frame_counters();
        counters
            .frames_in_ok
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let bytes = (FrameHeader::LEN + frame.payload.len()) as u64;
        counters
            .bytes_in
            .fetch_add(bytes, std::sync::atomic::Ordering::Relaxed);
    }
    Ok(Some(frame))
}

pub(crate) async fn write_frame_parts<W>(send: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header_bytes = [0u8; FrameHeader::LEN];
    frame.header.encode_into(&mut header_bytes);
    send.write_all(&header_bytes)
        .await
        .map_err(ClientError::io)?;
    send.write_all(&frame.payload)
        .await
        .map_err(ClientError::io)?;
    #[cfg(feature = "telemetry")]
    {
        let counters = frame_counters();
        counters
            .frames_out_ok
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let bytes = (FrameHeader::LEN + frame.payload.len()) as u64;
        counters
            .bytes_out
            .fetch_add(bytes, std::sync::atomic::Ordering::Relaxed);
    }
    Ok(())
}

/// Encode and write one request. Does not flush: batching and the flush
/// decision belong to the caller.
pub(crate) async fn write_request<W>(send: &mut W, request: &Request) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = request.encode()?;
    write_frame_parts(send, &frame).await
}
