//! Little-endian integers and strings as they appear inside packet payloads.
//!
//! Every reader returns the decoded value together with the unread tail.

use crate::error::{Error, Result};

#[inline]
fn take<const N: usize>(data: &[u8]) -> Result<([u8; N], &[u8])> {
    let (head, rest) = data.split_first_chunk::<N>().ok_or(Error::UnexpectedEof)?;
    Ok((*head, rest))
}

/// Read 1-byte integer
pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    let (&value, rest) = data.split_first().ok_or(Error::UnexpectedEof)?;
    Ok((value, rest))
}

/// Read 2-byte little-endian integer
pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    let (bytes, rest) = take::<2>(data)?;
    Ok((u16::from_le_bytes(bytes), rest))
}

/// Read 3-byte little-endian integer
pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    let ([a, b, c], rest) = take::<3>(data)?;
    Ok((u32::from_le_bytes([a, b, c, 0]), rest))
}

/// Read 4-byte little-endian integer
pub fn read_int_4(data: &[u8]) -> Result<(u32, &[u8])> {
    let (bytes, rest) = take::<4>(data)?;
    Ok((u32::from_le_bytes(bytes), rest))
}

/// Read 8-byte little-endian integer
pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    let (bytes, rest) = take::<8>(data)?;
    Ok((u64::from_le_bytes(bytes), rest))
}

/// Read length-encoded integer.
///
/// `0xFB` (NULL marker) and `0xFF` (ERR marker) are not integers and are rejected.
pub fn read_int_lenenc(data: &[u8]) -> Result<(u64, &[u8])> {
    let (first, rest) = read_int_1(data)?;
    match first {
        0xFC => read_int_2(rest).map(|(v, rest)| (u64::from(v), rest)),
        0xFD => read_int_3(rest).map(|(v, rest)| (u64::from(v), rest)),
        0xFE => read_int_8(rest),
        0xFB | 0xFF => Err(Error::InvalidPacket),
        value => Ok((u64::from(value), rest)),
    }
}

/// Read fixed-length string
pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    data.split_at_checked(len).ok_or(Error::UnexpectedEof)
}

/// Read null-terminated string
pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::UnexpectedEof)?;
    Ok((&data[..end], &data[end + 1..]))
}

/// Read length-encoded string
pub fn read_string_lenenc(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = read_int_lenenc(data)?;
    let len = usize::try_from(len).map_err(|_| Error::InvalidPacket)?;
    read_string_fix(rest, len)
}

/// Write 1-byte integer
pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte little-endian integer
pub fn write_int_2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 3-byte little-endian integer
pub fn write_int_3(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes()[..3]);
}

/// Write 4-byte little-endian integer
pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write 8-byte little-endian integer
pub fn write_int_8(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write length-encoded integer
pub fn write_int_lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xFC);
        write_int_2(out, value as u16);
    } else if value < (1 << 24) {
        out.push(0xFD);
        write_int_3(out, value as u32);
    } else {
        out.push(0xFE);
        write_int_8(out, value);
    }
}

/// Write null-terminated string
pub fn write_string_null(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Write length-encoded bytes
pub fn write_bytes_lenenc(out: &mut Vec<u8>, data: &[u8]) {
    write_int_lenenc(out, data.len() as u64);
    out.extend_from_slice(data);
}
