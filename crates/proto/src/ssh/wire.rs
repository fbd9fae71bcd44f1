//! SSH data type encoding (RFC 4251 Section 5).
//!
//! Shared by the connection, authentication and SFTP codecs. Readers take the
//! whole message plus a cursor so callers can decode fields in order.

use bytes::{BufMut, BytesMut};
use tether_platform::{TetherError, TetherResult};

pub(crate) fn write_string(buf: &mut BytesMut, s: &str) {
    write_bytes(buf, s.as_bytes());
}

pub(crate) fn write_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

pub(crate) fn write_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

pub(crate) fn write_name_list(buf: &mut BytesMut, names: &[String]) {
    write_string(buf, &names.join(","));
}

pub(crate) fn read_string(data: &[u8], offset: &mut usize) -> TetherResult<String> {
    let bytes = read_bytes(data, offset)?;
    String::from_utf8(bytes)
        .map_err(|_| TetherError::Protocol("String contains invalid UTF-8".to_string()))
}

pub(crate) fn read_bytes(data: &[u8], offset: &mut usize) -> TetherResult<Vec<u8>> {
    let length = read_u32(data, offset)? as usize;

    let end = offset.checked_add(length).filter(|end| *end <= data.len());
    let Some(end) = end else {
        return Err(TetherError::Protocol(format!(
            "Data truncated: expected {} bytes at offset {}",
            length, offset
        )));
    };

    let bytes = data[*offset..end].to_vec();
    *offset = end;

    Ok(bytes)
}

pub(crate) fn read_u8(data: &[u8], offset: &mut usize) -> TetherResult<u8> {
    let value = *data.get(*offset).ok_or_else(|| {
        TetherError::Protocol(format!("Cannot read byte at offset {}", offset))
    })?;
    *offset += 1;
    Ok(value)
}

pub(crate) fn read_bool(data: &[u8], offset: &mut usize) -> TetherResult<bool> {
    Ok(read_u8(data, offset)? != 0)
}

pub(crate) fn read_u32(data: &[u8], offset: &mut usize) -> TetherResult<u32> {
    let raw = data.get(*offset..*offset + 4).ok_or_else(|| {
        TetherError::Protocol(format!("Cannot read u32 at offset {}", offset))
    })?;
    *offset += 4;
    Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

pub(crate) fn read_u64(data: &[u8], offset: &mut usize) -> TetherResult<u64> {
    let raw = data.get(*offset..*offset + 8).ok_or_else(|| {
        TetherError::Protocol(format!("Cannot read u64 at offset {}", offset))
    })?;
    *offset += 8;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(raw);
    Ok(u64::from_be_bytes(bytes))
}

pub(crate) fn read_name_list(data: &[u8], offset: &mut usize) -> TetherResult<Vec<String>> {
    let list = read_string(data, offset)?;
    if list.is_empty() {
        return Ok(Vec::new());
    }
    Ok(list.split(',').map(str::to_string).collect())
}
