use bitflags::bitflags;

/// Largest payload a single physical packet can carry.
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;

/// Command bytes understood by the executor.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandByte {
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    Ping = 0x0e,
    ChangeUser = 0x11,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtClose = 0x19,
}

bitflags! {
    /// Capability flags exchanged during the handshake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapabilityFlags: u32 {
        const CLIENT_LONG_PASSWORD = 0x0000_0001;
        const CLIENT_FOUND_ROWS = 0x0000_0002;
        const CLIENT_LONG_FLAG = 0x0000_0004;
        const CLIENT_CONNECT_WITH_DB = 0x0000_0008;
        const CLIENT_NO_SCHEMA = 0x0000_0010;
        const CLIENT_COMPRESS = 0x0000_0020;
        const CLIENT_ODBC = 0x0000_0040;
        const CLIENT_LOCAL_FILES = 0x0000_0080;
        const CLIENT_IGNORE_SPACE = 0x0000_0100;
        const CLIENT_PROTOCOL_41 = 0x0000_0200;
        const CLIENT_INTERACTIVE = 0x0000_0400;
        const CLIENT_SSL = 0x0000_0800;
        const CLIENT_IGNORE_SIGPIPE = 0x0000_1000;
        const CLIENT_TRANSACTIONS = 0x0000_2000;
        const CLIENT_RESERVED = 0x0000_4000;
        const CLIENT_SECURE_CONNECTION = 0x0000_8000;
        const CLIENT_MULTI_STATEMENTS = 0x0001_0000;
        const CLIENT_MULTI_RESULTS = 0x0002_0000;
        const CLIENT_PS_MULTI_RESULTS = 0x0004_0000;
        const CLIENT_PLUGIN_AUTH = 0x0008_0000;
        const CLIENT_CONNECT_ATTRS = 0x0010_0000;
        const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA = 0x0020_0000;
        const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS = 0x0040_0000;
        const CLIENT_SESSION_TRACK = 0x0080_0000;
        const CLIENT_DEPRECATE_EOF = 0x0100_0000;
        const CLIENT_OPTIONAL_RESULTSET_METADATA = 0x0200_0000;
        const CLIENT_ZSTD_COMPRESSION_ALGORITHM = 0x0400_0000;
        const CLIENT_QUERY_ATTRIBUTES = 0x0800_0000;
        const CLIENT_MULTI_FACTOR_AUTHENTICATION = 0x1000_0000;
        const CLIENT_CAPABILITY_EXTENSION = 0x2000_0000;
        const CLIENT_SSL_VERIFY_SERVER_CERT = 0x4000_0000;
        const CLIENT_REMEMBER_OPTIONS = 0x8000_0000;
    }
}

/// Requested on every connection.
pub const CAPABILITIES_ALWAYS_ENABLED: CapabilityFlags = CapabilityFlags::CLIENT_LONG_PASSWORD
    .union(CapabilityFlags::CLIENT_LONG_FLAG)
    .union(CapabilityFlags::CLIENT_PROTOCOL_41)
    .union(CapabilityFlags::CLIENT_TRANSACTIONS)
    .union(CapabilityFlags::CLIENT_SECURE_CONNECTION)
    .union(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    .union(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA);

/// May be toggled through [`crate::Opts::capabilities`].
pub const CAPABILITIES_CONFIGURABLE: CapabilityFlags = CapabilityFlags::CLIENT_FOUND_ROWS
    .union(CapabilityFlags::CLIENT_IGNORE_SPACE)
    .union(CapabilityFlags::CLIENT_DEPRECATE_EOF);

/// Derived from other connection options (database, TLS, LOCAL INFILE).
pub const CAPABILITIES_FROM_OPTS: CapabilityFlags = CapabilityFlags::CLIENT_CONNECT_WITH_DB
    .union(CapabilityFlags::CLIENT_SSL)
    .union(CapabilityFlags::CLIENT_LOCAL_FILES);

/// Never requested. Multi-statement and multi-result support is absent on purpose:
/// a command must map to exactly one result.
pub const CAPABILITIES_ALWAYS_DISABLED: CapabilityFlags = CapabilityFlags::CLIENT_NO_SCHEMA
    .union(CapabilityFlags::CLIENT_COMPRESS)
    .union(CapabilityFlags::CLIENT_ODBC)
    .union(CapabilityFlags::CLIENT_INTERACTIVE)
    .union(CapabilityFlags::CLIENT_IGNORE_SIGPIPE)
    .union(CapabilityFlags::CLIENT_RESERVED)
    .union(CapabilityFlags::CLIENT_MULTI_STATEMENTS)
    .union(CapabilityFlags::CLIENT_MULTI_RESULTS)
    .union(CapabilityFlags::CLIENT_PS_MULTI_RESULTS)
    .union(CapabilityFlags::CLIENT_CONNECT_ATTRS)
    .union(CapabilityFlags::CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS)
    .union(CapabilityFlags::CLIENT_SESSION_TRACK)
    .union(CapabilityFlags::CLIENT_OPTIONAL_RESULTSET_METADATA)
    .union(CapabilityFlags::CLIENT_ZSTD_COMPRESSION_ALGORITHM)
    .union(CapabilityFlags::CLIENT_QUERY_ATTRIBUTES)
    .union(CapabilityFlags::CLIENT_MULTI_FACTOR_AUTHENTICATION)
    .union(CapabilityFlags::CLIENT_CAPABILITY_EXTENSION)
    .union(CapabilityFlags::CLIENT_SSL_VERIFY_SERVER_CERT)
    .union(CapabilityFlags::CLIENT_REMEMBER_OPTIONS);

bitflags! {
    /// Session status reported in OK and EOF packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServerStatusFlags: u16 {
        const SERVER_STATUS_IN_TRANS = 0x0001;
        const SERVER_STATUS_AUTOCOMMIT = 0x0002;
        const SERVER_MORE_RESULTS_EXISTS = 0x0008;
        const SERVER_STATUS_NO_GOOD_INDEX_USED = 0x0010;
        const SERVER_STATUS_NO_INDEX_USED = 0x0020;
        const SERVER_STATUS_CURSOR_EXISTS = 0x0040;
        const SERVER_STATUS_LAST_ROW_SENT = 0x0080;
        const SERVER_STATUS_DB_DROPPED = 0x0100;
        const SERVER_STATUS_NO_BACKSLASH_ESCAPES = 0x0200;
        const SERVER_STATUS_METADATA_CHANGED = 0x0400;
        const SERVER_QUERY_WAS_SLOW = 0x0800;
        const SERVER_PS_OUT_PARAMS = 0x1000;
        const SERVER_STATUS_IN_TRANS_READONLY = 0x2000;
        const SERVER_SESSION_STATE_CHANGED = 0x4000;
    }
}

bitflags! {
    /// Column definition flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColumnFlags: u16 {
        const NOT_NULL_FLAG = 0x0001;
        const PRI_KEY_FLAG = 0x0002;
        const UNIQUE_KEY_FLAG = 0x0004;
        const MULTIPLE_KEY_FLAG = 0x0008;
        const BLOB_FLAG = 0x0010;
        const UNSIGNED_FLAG = 0x0020;
        const ZEROFILL_FLAG = 0x0040;
        const BINARY_FLAG = 0x0080;
        const ENUM_FLAG = 0x0100;
        const AUTO_INCREMENT_FLAG = 0x0200;
        const TIMESTAMP_FLAG = 0x0400;
        const SET_FLAG = 0x0800;
        const NO_DEFAULT_VALUE_FLAG = 0x1000;
        const ON_UPDATE_NOW_FLAG = 0x2000;
        const PART_KEY_FLAG = 0x4000;
        const NUM_FLAG = 0x8000;
    }
}

/// MySQL column types
#[expect(non_camel_case_types)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    MYSQL_TYPE_DECIMAL = 0x00,
    MYSQL_TYPE_TINY = 0x01,
    MYSQL_TYPE_SHORT = 0x02,
    MYSQL_TYPE_LONG = 0x03,
    MYSQL_TYPE_FLOAT = 0x04,
    MYSQL_TYPE_DOUBLE = 0x05,
    MYSQL_TYPE_NULL = 0x06,
    MYSQL_TYPE_TIMESTAMP = 0x07,
    MYSQL_TYPE_LONGLONG = 0x08,
    MYSQL_TYPE_INT24 = 0x09,
    MYSQL_TYPE_DATE = 0x0a,
    MYSQL_TYPE_TIME = 0x0b,
    MYSQL_TYPE_DATETIME = 0x0c,
    MYSQL_TYPE_YEAR = 0x0d,
    MYSQL_TYPE_NEWDATE = 0x0e,
    MYSQL_TYPE_VARCHAR = 0x0f,
    MYSQL_TYPE_BIT = 0x10,
    MYSQL_TYPE_TIMESTAMP2 = 0x11,
    MYSQL_TYPE_DATETIME2 = 0x12,
    MYSQL_TYPE_TIME2 = 0x13,
    MYSQL_TYPE_TYPED_ARRAY = 0x14,
    MYSQL_TYPE_JSON = 0xf5,
    MYSQL_TYPE_NEWDECIMAL = 0xf6,
    MYSQL_TYPE_ENUM = 0xf7,
    MYSQL_TYPE_SET = 0xf8,
    MYSQL_TYPE_TINY_BLOB = 0xf9,
    MYSQL_TYPE_MEDIUM_BLOB = 0xfa,
    MYSQL_TYPE_LONG_BLOB = 0xfb,
    MYSQL_TYPE_BLOB = 0xfc,
    MYSQL_TYPE_VAR_STRING = 0xfd,
    MYSQL_TYPE_STRING = 0xfe,
    MYSQL_TYPE_GEOMETRY = 0xff,
}

impl ColumnType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x00 => Self::MYSQL_TYPE_DECIMAL,
            0x01 => Self::MYSQL_TYPE_TINY,
            0x02 => Self::MYSQL_TYPE_SHORT,
            0x03 => Self::MYSQL_TYPE_LONG,
            0x04 => Self::MYSQL_TYPE_FLOAT,
            0x05 => Self::MYSQL_TYPE_DOUBLE,
            0x06 => Self::MYSQL_TYPE_NULL,
            0x07 => Self::MYSQL_TYPE_TIMESTAMP,
            0x08 => Self::MYSQL_TYPE_LONGLONG,
            0x09 => Self::MYSQL_TYPE_INT24,
            0x0a => Self::MYSQL_TYPE_DATE,
            0x0b => Self::MYSQL_TYPE_TIME,
            0x0c => Self::MYSQL_TYPE_DATETIME,
            0x0d => Self::MYSQL_TYPE_YEAR,
            0x0e => Self::MYSQL_TYPE_NEWDATE,
            0x0f => Self::MYSQL_TYPE_VARCHAR,
            0x10 => Self::MYSQL_TYPE_BIT,
            0x11 => Self::MYSQL_TYPE_TIMESTAMP2,
            0x12 => Self::MYSQL_TYPE_DATETIME2,
            0x13 => Self::MYSQL_TYPE_TIME2,
            0x14 => Self::MYSQL_TYPE_TYPED_ARRAY,
            0xf5 => Self::MYSQL_TYPE_JSON,
            0xf6 => Self::MYSQL_TYPE_NEWDECIMAL,
            0xf7 => Self::MYSQL_TYPE_ENUM,
            0xf8 => Self::MYSQL_TYPE_SET,
            0xf9 => Self::MYSQL_TYPE_TINY_BLOB,
            0xfa => Self::MYSQL_TYPE_MEDIUM_BLOB,
            0xfb => Self::MYSQL_TYPE_LONG_BLOB,
            0xfc => Self::MYSQL_TYPE_BLOB,
            0xfd => Self::MYSQL_TYPE_VAR_STRING,
            0xfe => Self::MYSQL_TYPE_STRING,
            0xff => Self::MYSQL_TYPE_GEOMETRY,
            _ => return None,
        })
    }
}

/// Collation ids sent in the handshake response.
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const ASCII_GENERAL_CI: u8 = 11;
    pub const UTF8MB3_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;

    /// Resolve a charset name as accepted by the `charset` URL parameter.
    pub fn from_name(name: &str) -> Option<u8> {
        match name.to_ascii_lowercase().as_str() {
            "latin1" => Some(LATIN1_SWEDISH_CI),
            "ascii" => Some(ASCII_GENERAL_CI),
            "utf8" | "utf8mb3" => Some(UTF8MB3_GENERAL_CI),
            "utf8mb4" => Some(UTF8MB4_GENERAL_CI),
            "binary" => Some(BINARY),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_flags_classification() {
        let always_enabled = CAPABILITIES_ALWAYS_ENABLED;
        let configurable = CAPABILITIES_CONFIGURABLE;
        let from_opts = CAPABILITIES_FROM_OPTS;
        let always_disabled = CAPABILITIES_ALWAYS_DISABLED;

        let groups = [always_enabled, configurable, from_opts, always_disabled];
        for (i, a) in groups.iter().enumerate() {
            for b in groups.iter().skip(i + 1) {
                assert!(a.intersection(*b).is_empty(), "{a:?} overlaps {b:?}");
            }
        }

        let union = always_enabled | configurable | from_opts | always_disabled;
        assert_eq!(
            union.bits(),
            u32::MAX,
            "missing flags: 0x{:08X}",
            !union.bits()
        );

        assert!(always_enabled.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(always_enabled.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH));
        assert!(always_disabled.contains(CapabilityFlags::CLIENT_MULTI_STATEMENTS));
        assert!(always_disabled.contains(CapabilityFlags::CLIENT_MULTI_RESULTS));
    }

    #[test]
    fn test_charset_from_name() {
        assert_eq!(charset::from_name("utf8mb4"), Some(charset::UTF8MB4_GENERAL_CI));
        assert_eq!(charset::from_name("LATIN1"), Some(charset::LATIN1_SWEDISH_CI));
        assert_eq!(charset::from_name("klingon"), None);
    }

    #[test]
    fn test_column_type_from_u8() {
        assert_eq!(ColumnType::from_u8(0xfd), Some(ColumnType::MYSQL_TYPE_VAR_STRING));
        assert_eq!(ColumnType::from_u8(0x06), Some(ColumnType::MYSQL_TYPE_NULL));
        assert_eq!(ColumnType::from_u8(0x20), None);
    }
}
