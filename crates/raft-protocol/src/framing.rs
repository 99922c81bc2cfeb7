//! # framing
//!
//! why: tcp is a byte stream; every payload travels behind a 4-byte
//! big-endian length that does not count itself
//! relations: used by pipeline.rs for raft traffic and by handshake/* for
//! negotiation messages
//! what: frame encode, incremental frame split, async frame read/write

use crate::error::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const LENGTH_FIELD: usize = 4;

/// Upper bound on a single frame; one entry may be 1 GiB plus message overhead
pub const DEFAULT_MAX_FRAME: usize = 1024 * 1024 * 1024 + 64 * 1024;

pub fn put_frame(out: &mut BytesMut, payload: &[u8]) {
    out.reserve(LENGTH_FIELD + payload.len());
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
}

/// Take one complete frame off the front of `buf`, if there is one
pub fn split_frame(buf: &mut BytesMut, max_frame: usize) -> Result<Option<Bytes>, CodecError> {
    if buf.len() < LENGTH_FIELD {
        return Ok(None);
    }
    let len = (&buf[..LENGTH_FIELD]).get_u32() as usize;
    if len > max_frame {
        return Err(CodecError::FrameTooLarge {
            size: len,
            limit: max_frame,
        });
    }
    if buf.len() < LENGTH_FIELD + len {
        buf.reserve(LENGTH_FIELD + len - buf.len());
        return Ok(None);
    }
    buf.advance(LENGTH_FIELD);
    Ok(Some(buf.split_to(len).freeze()))
}

/// Read the next frame; `None` on a clean end of stream between frames
pub async fn read_frame<R>(reader: &mut R, max_frame: usize) -> Result<Option<Bytes>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; LENGTH_FIELD];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_frame {
        return Err(CodecError::FrameTooLarge {
            size: len,
            limit: max_frame,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut out = BytesMut::with_capacity(LENGTH_FIELD + payload.len());
    put_frame(&mut out, payload);
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}
