//! Binary protocol values.

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::col::ColumnDefinition;
use crate::constant::ColumnType;
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::value::{Date, DateTime, Time, Value};

/// DATE/DATETIME/TIMESTAMP - 4 bytes (ymd)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp4 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
}

/// DATE/DATETIME/TIMESTAMP - 7 bytes (ymd + hms)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp7 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// DATE/DATETIME/TIMESTAMP - 11 bytes (ymd + hms + microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Timestamp11 {
    pub year: U16LE,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

/// TIME - 8 bytes
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time8 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// TIME - 12 bytes (with microseconds)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct Time12 {
    pub is_negative: u8,
    pub days: U32LE,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: U32LE,
}

impl From<&Timestamp4> for DateTime {
    fn from(ts: &Timestamp4) -> Self {
        DateTime::date(ts.year.get(), ts.month, ts.day)
    }
}

impl From<&Timestamp7> for DateTime {
    fn from(ts: &Timestamp7) -> Self {
        DateTime {
            hour: ts.hour,
            minute: ts.minute,
            second: ts.second,
            ..DateTime::date(ts.year.get(), ts.month, ts.day)
        }
    }
}

impl From<&Timestamp11> for DateTime {
    fn from(ts: &Timestamp11) -> Self {
        DateTime {
            hour: ts.hour,
            minute: ts.minute,
            second: ts.second,
            microsecond: ts.microsecond.get(),
            ..DateTime::date(ts.year.get(), ts.month, ts.day)
        }
    }
}

impl From<&Time8> for Time {
    fn from(t: &Time8) -> Self {
        Time {
            negative: t.is_negative != 0,
            days: t.days.get(),
            hour: t.hour,
            minute: t.minute,
            second: t.second,
            microsecond: 0,
        }
    }
}

impl From<&Time12> for Time {
    fn from(t: &Time12) -> Self {
        Time {
            negative: t.is_negative != 0,
            days: t.days.get(),
            hour: t.hour,
            minute: t.minute,
            second: t.second,
            microsecond: t.microsecond.get(),
        }
    }
}

fn cast<T: FromBytes + KnownLayout + Immutable>(data: &[u8]) -> Result<(&T, &[u8])> {
    T::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)
}

/// Parse a single binary protocol value for `column`.
///
/// Returns the parsed value and the remaining bytes.
pub fn read_binary_value<'a>(column: &ColumnDefinition, data: &'a [u8]) -> Result<(Value, &'a [u8])> {
    let unsigned = column.is_unsigned();

    macro_rules! int {
        ($read:ident, $signed:ty) => {{
            let (val, rest) = $read(data)?;
            let value = if unsigned {
                Value::UInt(u64::from(val))
            } else {
                Value::Int(val as $signed as i64)
            };
            Ok((value, rest))
        }};
    }

    match column.column_type {
        ColumnType::MYSQL_TYPE_NULL => Ok((Value::Null, data)),
        ColumnType::MYSQL_TYPE_TINY => int!(read_int_1, i8),
        ColumnType::MYSQL_TYPE_SHORT | ColumnType::MYSQL_TYPE_YEAR => int!(read_int_2, i16),
        ColumnType::MYSQL_TYPE_INT24 | ColumnType::MYSQL_TYPE_LONG => int!(read_int_4, i32),
        ColumnType::MYSQL_TYPE_LONGLONG => int!(read_int_8, i64),

        ColumnType::MYSQL_TYPE_FLOAT => {
            let (val, rest) = read_int_4(data)?;
            Ok((Value::Float(f32::from_bits(val)), rest))
        }
        ColumnType::MYSQL_TYPE_DOUBLE => {
            let (val, rest) = read_int_8(data)?;
            Ok((Value::Double(f64::from_bits(val)), rest))
        }

        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => {
            let (len, rest) = read_int_1(data)?;
            let (value, rest): (DateTime, _) = match len {
                0 => (DateTime::default(), rest),
                4 => cast::<Timestamp4>(rest).map(|(ts, rest)| (ts.into(), rest))?,
                _ => return Err(Error::InvalidPacket),
            };
            let date = Date {
                year: value.year,
                month: value.month,
                day: value.day,
            };
            Ok((Value::Date(date), rest))
        }

        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2
        | ColumnType::MYSQL_TYPE_DATETIME2 => {
            let (len, rest) = read_int_1(data)?;
            let (value, rest) = match len {
                0 => (DateTime::default(), rest),
                4 => cast::<Timestamp4>(rest).map(|(ts, rest)| (ts.into(), rest))?,
                7 => cast::<Timestamp7>(rest).map(|(ts, rest)| (ts.into(), rest))?,
                11 => cast::<Timestamp11>(rest).map(|(ts, rest)| (ts.into(), rest))?,
                _ => return Err(Error::InvalidPacket),
            };
            Ok((Value::DateTime(value), rest))
        }

        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => {
            let (len, rest) = read_int_1(data)?;
            let (value, rest) = match len {
                0 => (Time::default(), rest),
                8 => cast::<Time8>(rest).map(|(t, rest)| (t.into(), rest))?,
                12 => cast::<Time12>(rest).map(|(t, rest)| (t.into(), rest))?,
                _ => return Err(Error::InvalidPacket),
            };
            Ok((Value::Time(value), rest))
        }

        ColumnType::MYSQL_TYPE_VARCHAR
        | ColumnType::MYSQL_TYPE_VAR_STRING
        | ColumnType::MYSQL_TYPE_STRING
        | ColumnType::MYSQL_TYPE_BLOB
        | ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_GEOMETRY
        | ColumnType::MYSQL_TYPE_JSON
        | ColumnType::MYSQL_TYPE_DECIMAL
        | ColumnType::MYSQL_TYPE_NEWDECIMAL
        | ColumnType::MYSQL_TYPE_ENUM
        | ColumnType::MYSQL_TYPE_SET
        | ColumnType::MYSQL_TYPE_BIT
        | ColumnType::MYSQL_TYPE_TYPED_ARRAY => {
            let (bytes, rest) = read_string_lenenc(data)?;
            Ok((Value::Bytes(bytes.to_vec()), rest))
        }
    }
}

/// NULL bitmap of a binary result row, offset by 2 bits
#[derive(Debug, Clone, Copy)]
pub struct NullBitmap<'a> {
    bitmap: &'a [u8],
}

impl<'a> NullBitmap<'a> {
    pub fn for_result_set(bitmap: &'a [u8]) -> Self {
        Self { bitmap }
    }

    /// Bitmap length in bytes for `num_columns` result columns.
    pub fn result_set_len(num_columns: usize) -> usize {
        (num_columns + 7 + 2) >> 3
    }

    pub fn is_null(&self, idx: usize) -> bool {
        let bit_pos = idx + 2;
        self.bitmap
            .get(bit_pos >> 3)
            .is_some_and(|byte| byte & (1 << (bit_pos & 7)) != 0)
    }
}
