use crate::constant::ColumnType;
use crate::error::Result;
use crate::protocol::primitive::*;
use crate::value::{Date, DateTime, Time, Value};

/// Binary encoding of a single COM_STMT_EXECUTE parameter.
pub trait Param {
    /// Returns true if this parameter is NULL
    fn is_null(&self) -> bool {
        false
    }

    /// Encode parameter type
    ///
    /// Format:
    /// - Byte 0: MySQL type (MYSQL_TYPE_*)
    /// - Byte 1: Unsigned flag (0x80 if unsigned, 0x00 otherwise)
    fn encode_type(&self, out: &mut Vec<u8>);

    /// Encode parameter value. Only called if `is_null()` returns false.
    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()>;
}

impl Param for Value {
    fn is_null(&self) -> bool {
        Value::is_null(self)
    }

    fn encode_type(&self, out: &mut Vec<u8>) {
        let (column_type, unsigned) = match self {
            Value::Null => (ColumnType::MYSQL_TYPE_NULL, false),
            Value::Int(_) => (ColumnType::MYSQL_TYPE_LONGLONG, false),
            Value::UInt(_) => (ColumnType::MYSQL_TYPE_LONGLONG, true),
            Value::Float(_) => (ColumnType::MYSQL_TYPE_FLOAT, false),
            Value::Double(_) => (ColumnType::MYSQL_TYPE_DOUBLE, false),
            Value::Bytes(_) => (ColumnType::MYSQL_TYPE_VAR_STRING, false),
            Value::Date(_) => (ColumnType::MYSQL_TYPE_DATE, false),
            Value::DateTime(_) => (ColumnType::MYSQL_TYPE_DATETIME, false),
            Value::Time(_) => (ColumnType::MYSQL_TYPE_TIME, false),
        };
        out.push(column_type as u8);
        out.push(if unsigned { 0x80 } else { 0x00 });
    }

    fn encode_value(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Value::Null => {}
            Value::Int(v) => write_int_8(out, *v as u64),
            Value::UInt(v) => write_int_8(out, *v),
            Value::Float(v) => write_int_4(out, v.to_bits()),
            Value::Double(v) => write_int_8(out, v.to_bits()),
            Value::Bytes(bytes) => write_bytes_lenenc(out, bytes),
            Value::Date(d) => encode_date(out, d),
            Value::DateTime(dt) => encode_datetime(out, dt),
            Value::Time(t) => encode_time(out, t),
        }
        Ok(())
    }
}

fn encode_date(out: &mut Vec<u8>, d: &Date) {
    write_int_1(out, 4);
    write_int_2(out, d.year);
    write_int_1(out, d.month);
    write_int_1(out, d.day);
}

fn encode_datetime(out: &mut Vec<u8>, dt: &DateTime) {
    let has_time = dt.hour != 0 || dt.minute != 0 || dt.second != 0;
    let len = if dt.microsecond != 0 {
        11
    } else if has_time {
        7
    } else {
        4
    };
    write_int_1(out, len);
    write_int_2(out, dt.year);
    write_int_1(out, dt.month);
    write_int_1(out, dt.day);
    if len >= 7 {
        write_int_1(out, dt.hour);
        write_int_1(out, dt.minute);
        write_int_1(out, dt.second);
    }
    if len == 11 {
        write_int_4(out, dt.microsecond);
    }
}

fn encode_time(out: &mut Vec<u8>, t: &Time) {
    let len = if t.microsecond != 0 { 12 } else { 8 };
    write_int_1(out, len);
    write_int_1(out, u8::from(t.negative));
    write_int_4(out, t.days);
    write_int_1(out, t.hour);
    write_int_1(out, t.minute);
    write_int_1(out, t.second);
    if len == 12 {
        write_int_4(out, t.microsecond);
    }
}
