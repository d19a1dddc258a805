//! COM_QUERY encoding with client-side `?` placeholder binding.

use crate::constant::CommandByte;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::value::Value;

/// Write COM_QUERY command
pub fn write_query(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::Query as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// Write COM_QUERY with every `?` placeholder replaced by a literal of the matching
/// parameter.
///
/// `?` inside quoted strings, quoted identifiers and comments is left alone. With an
/// empty parameter list the statement is sent unchanged.
pub fn write_query_with_params(
    out: &mut Vec<u8>,
    sql: &str,
    params: &[Value],
    no_backslash_escapes: bool,
) -> Result<()> {
    if params.is_empty() {
        write_query(out, sql);
        return Ok(());
    }

    write_int_1(out, CommandByte::Query as u8);
    let bytes = sql.as_bytes();
    let mut params = params.iter();
    let mut used = 0;
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, quote, !no_backslash_escapes);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-')
                && bytes.get(i + 2).is_none_or(|c| c.is_ascii_whitespace()) =>
            {
                i = skip_line(bytes, i);
            }
            b'#' => i = skip_line(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = bytes[i + 2..]
                    .windows(2)
                    .position(|w| w == b"*/")
                    .map_or(bytes.len(), |p| i + 2 + p + 2);
            }
            b'?' => {
                used += 1;
                let param = params.next().ok_or_else(|| count_mismatch(sql, used, None))?;
                out.extend_from_slice(&bytes[copied..i]);
                write_literal(out, param, no_backslash_escapes)?;
                i += 1;
                copied = i;
            }
            _ => i += 1,
        }
    }

    let remaining = params.len();
    if remaining > 0 {
        return Err(count_mismatch(sql, used, Some(used + remaining)));
    }
    out.extend_from_slice(&bytes[copied..]);
    Ok(())
}

fn count_mismatch(sql: &str, placeholders: usize, params: Option<usize>) -> Error {
    match params {
        Some(params) => Error::BadUsageError(format!(
            "{params} parameters given but only {placeholders} placeholders in: {sql}"
        )),
        None => Error::BadUsageError(format!(
            "not enough parameters for placeholder #{placeholders} in: {sql}"
        )),
    }
}

/// Index just past the closing quote. Doubled quotes always escape; a backslash
/// escapes inside string literals only when `backslash` is set.
fn skip_quoted(bytes: &[u8], start: usize, quote: u8, backslash: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash && quote != b'`' => i += 2,
            c if c == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return i + 1;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_line(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&c| c == b'\n')
        .map_or(bytes.len(), |p| start + p + 1)
}

/// Append `value` as an SQL literal.
pub fn write_literal(out: &mut Vec<u8>, value: &Value, no_backslash_escapes: bool) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"NULL"),
        Value::Int(v) => out.extend_from_slice(v.to_string().as_bytes()),
        Value::UInt(v) => out.extend_from_slice(v.to_string().as_bytes()),
        Value::Float(v) => {
            if !v.is_finite() {
                return Err(Error::BadUsageError(format!("cannot bind {v} as an SQL literal")));
            }
            out.extend_from_slice(v.to_string().as_bytes());
        }
        Value::Double(v) => {
            if !v.is_finite() {
                return Err(Error::BadUsageError(format!("cannot bind {v} as an SQL literal")));
            }
            out.extend_from_slice(v.to_string().as_bytes());
        }
        Value::Bytes(bytes) => write_quoted(out, bytes, no_backslash_escapes),
        Value::Date(d) => write_quoted(out, d.to_string().as_bytes(), no_backslash_escapes),
        Value::DateTime(dt) => write_quoted(out, dt.to_string().as_bytes(), no_backslash_escapes),
        Value::Time(t) => write_quoted(out, t.to_string().as_bytes(), no_backslash_escapes),
    }
    Ok(())
}

/// Append `bytes` as a single-quoted string literal.
///
/// With NO_BACKSLASH_ESCAPES active the server treats `\` literally, so only the
/// quote is doubled.
pub fn write_quoted(out: &mut Vec<u8>, bytes: &[u8], no_backslash_escapes: bool) {
    out.reserve(bytes.len() + 2);
    out.push(b'\'');
    if no_backslash_escapes {
        for &b in bytes {
            if b == b'\'' {
                out.push(b'\'');
            }
            out.push(b);
        }
    } else {
        for &b in bytes {
            match b {
                0x00 => out.extend_from_slice(b"\\0"),
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\\' => out.extend_from_slice(b"\\\\"),
                b'\'' => out.extend_from_slice(b"\\'"),
                b'"' => out.extend_from_slice(b"\\\""),
                0x1A => out.extend_from_slice(b"\\Z"),
                _ => out.push(b),
            }
        }
    }
    out.push(b'\'');
}
