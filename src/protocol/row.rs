use crate::col::ColumnDefinition;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::value::{NullBitmap, read_binary_value};
use crate::value::Value;

/// Text protocol row: one length-encoded string per column, `0xFB` for NULL.
#[derive(Debug, Clone, Copy)]
pub struct TextRowPayload<'a>(pub &'a [u8]);

impl TextRowPayload<'_> {
    pub fn decode(&self, num_columns: usize) -> Result<Vec<Value>> {
        let mut data = self.0;
        let mut values = Vec::with_capacity(num_columns);
        for _ in 0..num_columns {
            if let Some((0xFB, rest)) = data.split_first() {
                values.push(Value::Null);
                data = rest;
                continue;
            }
            let (bytes, rest) = read_string_lenenc(data)?;
            values.push(Value::Bytes(bytes.to_vec()));
            data = rest;
        }
        if !data.is_empty() {
            return Err(Error::InvalidPacket);
        }
        Ok(values)
    }
}

/// Binary protocol row: `0x00` header, NULL bitmap, then the non-NULL values.
#[derive(Debug, Clone, Copy)]
pub struct BinaryRowPayload<'a> {
    null_bitmap: NullBitmap<'a>,
    values: &'a [u8],
}

impl<'a> BinaryRowPayload<'a> {
    pub fn parse(payload: &'a [u8], num_columns: usize) -> Result<Self> {
        let (header, data) = read_int_1(payload)?;
        if header != 0x00 {
            return Err(Error::InvalidPacket);
        }
        let (bitmap, values) = read_string_fix(data, NullBitmap::result_set_len(num_columns))?;
        Ok(Self {
            null_bitmap: NullBitmap::for_result_set(bitmap),
            values,
        })
    }

    pub fn decode(&self, columns: &[ColumnDefinition]) -> Result<Vec<Value>> {
        let mut data = self.values;
        let mut values = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            if self.null_bitmap.is_null(idx) {
                values.push(Value::Null);
                continue;
            }
            let (value, rest) = read_binary_value(column, data)?;
            values.push(value);
            data = rest;
        }
        Ok(values)
    }
}
