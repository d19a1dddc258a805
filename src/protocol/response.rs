use zerocopy::byteorder::little_endian::U16 as U16LE;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::ServerStatusFlags;
use crate::error::{Error, Result};
use crate::protocol::packet::{ErrPayloadBytes, OkPayloadBytes};
use crate::protocol::primitive::*;

/// OK packet response, also used for the end-of-result marker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl OkPayload {
    /// Parse the packet that ends a result set: an OK packet with a `0xFE` header
    /// when EOF packets are deprecated, a classic EOF packet otherwise.
    pub fn from_terminal(payload: &[u8], deprecate_eof: bool) -> Result<Self> {
        if deprecate_eof {
            return Self::try_from(OkPayloadBytes(payload));
        }
        let eof = read_eof_packet(payload)?;
        Ok(Self {
            status_flags: eof.status_flags(),
            warnings: eof.warnings.get(),
            ..Self::default()
        })
    }
}

impl TryFrom<OkPayloadBytes<'_>> for OkPayload {
    type Error = Error;

    fn try_from(bytes: OkPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.bytes())?;
        if header != 0x00 && header != 0xFE {
            return Err(Error::InvalidPacket);
        }

        let (affected_rows, rest) = read_int_lenenc(data)?;
        let (last_insert_id, rest) = read_int_lenenc(rest)?;
        let (status_flags, rest) = read_int_2(rest)?;
        let (warnings, rest) = read_int_2(rest)?;

        // Without CLIENT_SESSION_TRACK the remainder is a human-readable message.
        let info = String::from_utf8_lossy(rest).into_owned();

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags: ServerStatusFlags::from_bits_retain(status_flags),
            warnings,
            info,
        })
    }
}

/// ERR packet response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ERROR {} ({}): {}", self.error_code, self.sql_state, self.message)]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != 0xFF {
            return Err(Error::InvalidPacket);
        }

        let (error_code, data) = read_int_2(data)?;

        // The '#' state marker is absent in errors sent before the handshake settles.
        let (sql_state, rest) = match data.split_first() {
            Some((b'#', rest)) => {
                let (state, rest) = read_string_fix(rest, 5)?;
                (String::from_utf8_lossy(state).into_owned(), rest)
            }
            _ => (String::new(), data),
        };

        Ok(ErrPayload {
            error_code,
            sql_state,
            message: String::from_utf8_lossy(rest).into_owned(),
        })
    }
}

/// EOF packet body after the 0xFE header.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct EofPacket {
    pub warnings: U16LE,
    pub status_flags: U16LE,
}

impl EofPacket {
    pub fn status_flags(&self) -> ServerStatusFlags {
        ServerStatusFlags::from_bits_retain(self.status_flags.get())
    }
}

/// Read EOF packet (header byte 0xFE, length < 9)
pub fn read_eof_packet(payload: &[u8]) -> Result<&EofPacket> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }
    let body = data.get(..4).ok_or(Error::UnexpectedEof)?;
    EofPacket::ref_from_bytes(body).map_err(|_| Error::InvalidPacket)
}

/// OK or ERR, as answered by commands without a result set.
pub fn read_ok_or_err(payload: &[u8]) -> Result<OkPayload> {
    match payload.first() {
        Some(0x00) => OkPayload::try_from(OkPayloadBytes(payload)),
        Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
        Some(_) => Err(Error::InvalidPacket),
        None => Err(Error::UnexpectedEof),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_with_info() {
        let payload = b"\x00\x03\x00\x22\x00\x00\x00Rows matched: 3  Changed: 3  Warnings: 0";
        let ok = OkPayload::try_from(OkPayloadBytes(payload)).unwrap();
        assert_eq!(ok.affected_rows, 3);
        assert!(ok.status_flags.contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT));
        assert_eq!(ok.info, "Rows matched: 3  Changed: 3  Warnings: 0");
    }

    #[test]
    fn test_ok_without_info() {
        let ok = OkPayload::try_from(OkPayloadBytes(b"\x00\x01\x05\x02\x00\x01\x00")).unwrap();
        assert_eq!(ok.affected_rows, 1);
        assert_eq!(ok.last_insert_id, 5);
        assert_eq!(ok.warnings, 1);
        assert_eq!(ok.info, "");
    }

    #[test]
    fn test_terminal_packets() {
        let eof = OkPayload::from_terminal(b"\xfe\x00\x00\x02\x02", false).unwrap();
        assert!(
            eof.status_flags
                .contains(ServerStatusFlags::SERVER_STATUS_NO_BACKSLASH_ESCAPES)
        );
        let ok = OkPayload::from_terminal(b"\xfe\x00\x00\x02\x00\x00\x00", true).unwrap();
        assert_eq!(ok.status_flags, ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT);
    }

    #[test]
    fn test_err_without_state_marker() {
        let err = ErrPayload::try_from(ErrPayloadBytes(b"\xff\x15\x04Access denied")).unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "");
        assert_eq!(err.message, "Access denied");
    }

    #[test]
    fn test_read_ok_or_err() {
        assert!(read_ok_or_err(b"\x00\x00\x00\x02\x00\x00\x00").is_ok());
        let err = read_ok_or_err(b"\xff\x19\x04#42000Unknown database 'nope'").unwrap_err();
        assert!(matches!(err, Error::ServerError(ref e) if e.sql_state == "42000"));
        assert!(matches!(read_ok_or_err(b"\x01"), Err(Error::InvalidPacket)));
    }
}
