// Field primitives shared by both codec directions.
//
// Strings carry a signed 16-bit length where -1 means null; byte arrays a
// signed 32-bit length; maps and lists a 32-bit entry count. All integers
// are big-endian. Every read validates the remaining length before
// trusting a length field.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

use crate::error::{CodecError, Result};

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(CodecError::Incomplete);
    }
    Ok(())
}

pub(crate) fn get_u8(buf: &mut Bytes) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub(crate) fn get_u16(buf: &mut Bytes) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

pub(crate) fn get_i16(buf: &mut Bytes) -> Result<i16> {
    need(buf, 2)?;
    Ok(buf.get_i16())
}

pub(crate) fn get_u32(buf: &mut Bytes) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32())
}

pub(crate) fn get_i32(buf: &mut Bytes) -> Result<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub(crate) fn get_u64(buf: &mut Bytes) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64())
}

pub(crate) fn get_i64(buf: &mut Bytes) -> Result<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub(crate) fn get_string(buf: &mut Bytes) -> Result<Option<String>> {
    let len = get_i16(buf)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(CodecError::InvalidLength);
    }
    let len = len as usize;
    need(buf, len)?;
    let raw = buf.split_to(len);
    let text = std::str::from_utf8(&raw).map_err(|_| CodecError::InvalidString)?;
    Ok(Some(text.to_string()))
}

// Map entries and most protocol fields may not be null.
pub(crate) fn get_required_string(buf: &mut Bytes) -> Result<String> {
    get_string(buf)?.ok_or(CodecError::InvalidLength)
}

pub(crate) fn get_bytes(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_i32(buf)?;
    if len == -1 {
        return Ok(Bytes::new());
    }
    if len < 0 {
        return Err(CodecError::InvalidLength);
    }
    let len = len as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

pub(crate) fn get_exact(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    need(buf, len)?;
    Ok(buf.split_to(len))
}

pub(crate) fn get_string_map(buf: &mut Bytes) -> Result<HashMap<String, String>> {
    let count = get_u32(buf)? as usize;
    let mut map = HashMap::with_capacity(count.min(64));
    for _ in 0..count {
        let key = get_required_string(buf)?;
        let value = get_required_string(buf)?;
        map.insert(key, value);
    }
    Ok(map)
}

pub(crate) fn get_string_list(buf: &mut Bytes) -> Result<Vec<String>> {
    let count = get_u32(buf)? as usize;
    let mut list = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        list.push(get_required_string(buf)?);
    }
    Ok(list)
}

pub(crate) fn get_u16_list(buf: &mut Bytes) -> Result<Vec<u16>> {
    let count = get_u32(buf)? as usize;
    let mut list = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        list.push(get_u16(buf)?);
    }
    Ok(list)
}

pub(crate) fn put_string(buf: &mut BytesMut, value: Option<&str>) {
    match value {
        None => buf.put_i16(-1),
        Some(text) => {
            buf.put_i16(text.len() as i16);
            buf.put_slice(text.as_bytes());
        }
    }
}

pub(crate) fn put_bytes(buf: &mut BytesMut, value: &[u8]) {
    buf.put_i32(value.len() as i32);
    buf.put_slice(value);
}

pub(crate) fn put_string_map(buf: &mut BytesMut, map: &HashMap<String, String>) {
    buf.put_u32(map.len() as u32);
    for (key, value) in map {
        put_string(buf, Some(key));
        put_string(buf, Some(value));
    }
}

pub(crate) fn put_string_list(buf: &mut BytesMut, list: &[String]) {
    buf.put_u32(list.len() as u32);
    for item in list {
        put_string(buf, Some(item));
    }
}

pub(crate) fn put_u16_list(buf: &mut BytesMut, list: &[u16]) {
    buf.put_u32(list.len() as u32);
    for item in list {
        buf.put_u16(*item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, Some("stream-1"));
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes).expect("decode"), Some("stream-1".to_string()));
        assert!(bytes.is_empty());
    }

    #[test]
    fn null_string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, None);
        let mut bytes = buf.freeze();
        assert_eq!(get_string(&mut bytes).expect("decode"), None);
    }

    #[test]
    fn string_rejects_truncated_body() {
        let mut buf = BytesMut::new();
        buf.put_i16(5);
        buf.put_slice(b"ab");
        let err = get_string(&mut buf.freeze()).expect_err("truncated");
        assert_eq!(err, CodecError::Incomplete);
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_i16(2);
        buf.put_slice(&[0xFF, 0xFE]);
        let err = get_string(&mut buf.freeze()).expect_err("bad utf-8");
        assert_eq!(err, CodecError::InvalidString);
    }

    #[test]
    fn bytes_null_decodes_empty() {
        let mut buf = BytesMut::new();
        buf.put_i32(-1);
        let value = get_bytes(&mut buf.freeze()).expect("decode");
        assert!(value.is_empty());
    }

    #[test]
    fn map_round_trip() {
        let mut map = HashMap::new();
        map.insert("product".to_string(), "warren".to_string());
        let mut buf = BytesMut::new();
        put_string_map(&mut buf, &map);
        let decoded = get_string_map(&mut buf.freeze()).expect("decode");
        assert_eq!(decoded, map);
    }

    #[test]
    fn u16_list_round_trip() {
        let mut buf = BytesMut::new();
        put_u16_list(&mut buf, &[1, 2, 3]);
        let decoded = get_u16_list(&mut buf.freeze()).expect("decode");
        assert_eq!(decoded, vec![1, 2, 3]);
    }

    #[test]
    fn integer_reads_reject_truncation() {
        assert_eq!(get_u32(&mut Bytes::from_static(b"\x00")), Err(CodecError::Incomplete));
        assert_eq!(get_u64(&mut Bytes::from_static(b"\x00\x00")), Err(CodecError::Incomplete));
    }
}
