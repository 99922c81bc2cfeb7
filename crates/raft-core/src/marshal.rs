//! # marshal
//!
//! why: one place for bounds-checked big-endian reads so truncated input
//! becomes an error instead of a panic inside `bytes`
//! relations: used by content.rs here, by the wire codec and the segment reader

use crate::error::MarshalError;
use crate::types::MemberId;
use bytes::{Buf, BufMut};

pub fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<(), MarshalError> {
    if buf.remaining() < needed {
        return Err(MarshalError::EndOfBuffer {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

pub fn get_u8(buf: &mut impl Buf) -> Result<u8, MarshalError> {
    ensure_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_bool(buf: &mut impl Buf) -> Result<bool, MarshalError> {
    Ok(get_u8(buf)? != 0)
}

pub fn get_i32(buf: &mut impl Buf) -> Result<i32, MarshalError> {
    ensure_remaining(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn get_i64(buf: &mut impl Buf) -> Result<i64, MarshalError> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn get_u64(buf: &mut impl Buf) -> Result<u64, MarshalError> {
    ensure_remaining(buf, 8)?;
    Ok(buf.get_u64())
}

pub fn get_member(buf: &mut impl Buf) -> Result<MemberId, MarshalError> {
    get_u64(buf).map(MemberId)
}

pub fn put_bool(buf: &mut impl BufMut, value: bool) {
    buf.put_u8(u8::from(value));
}

pub fn put_member(buf: &mut impl BufMut, member: MemberId) {
    buf.put_u64(member.0);
}

/// i32 length prefix followed by the raw bytes
pub fn put_bytes(buf: &mut impl BufMut, bytes: &[u8]) {
    buf.put_i32(bytes.len() as i32);
    buf.put_slice(bytes);
}

pub fn get_bytes(buf: &mut impl Buf) -> Result<Vec<u8>, MarshalError> {
    let len = get_i32(buf)?;
    if len < 0 {
        return Err(MarshalError::InvalidLength(len as i64));
    }
    let len = len as usize;
    ensure_remaining(buf, len)?;
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub fn put_string(buf: &mut impl BufMut, value: &str) {
    put_bytes(buf, value.as_bytes());
}

pub fn get_string(buf: &mut impl Buf) -> Result<String, MarshalError> {
    let bytes = get_bytes(buf)?;
    String::from_utf8(bytes).map_err(|e| MarshalError::InvalidLength(e.as_bytes().len() as i64))
}
