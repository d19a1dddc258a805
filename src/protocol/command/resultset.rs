//! Sans-io decoder for the response to COM_QUERY and COM_STMT_EXECUTE.
//!
//! The response is one of: an OK packet, an ERR packet, a LOCAL INFILE request, or a
//! result set (column count, column definitions, optional EOF, rows, terminal packet).

use std::sync::Arc;

use tracing::{debug, warn};

use crate::buffer::BufferSet;
use crate::col::ColumnDefinition;
use crate::constant::{MAX_PAYLOAD_LEN, ServerStatusFlags};
use crate::error::{Error, Result, eyre};
use crate::protocol::command::{Action, ColumnDefinitionBytes};
use crate::protocol::packet::{ErrPayloadBytes, OkPayloadBytes};
use crate::protocol::primitive::read_int_lenenc;
use crate::protocol::response::{OkPayload, read_ok_or_err};
use crate::protocol::row::{BinaryRowPayload, TextRowPayload};
use crate::protocol::r#trait::ResultSetHandler;
use crate::row::Row;

/// Row encoding of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFormat {
    /// COM_QUERY: length-encoded strings.
    Text,
    /// COM_STMT_EXECUTE: NULL bitmap and typed values.
    Binary,
}

enum State {
    Start,
    FirstPacket,
    Columns {
        columns: Vec<ColumnDefinition>,
        remaining: usize,
    },
    ColumnsEof {
        columns: Arc<[ColumnDefinition]>,
    },
    Rows {
        columns: Arc<[ColumnDefinition]>,
    },
    DecliningLocalInfile {
        filename: String,
    },
    LocalInfileResult {
        filename: String,
    },
    Finished,
}

/// State machine for one result, with the handler called as packets are decoded.
pub struct ResultSet<'h, H> {
    state: State,
    handler: &'h mut H,
    format: RowFormat,
    deprecate_eof: bool,
    status_flags: Option<ServerStatusFlags>,
}

impl<'h, H: ResultSetHandler> ResultSet<'h, H> {
    pub fn new(handler: &'h mut H, format: RowFormat, deprecate_eof: bool) -> Self {
        Self {
            state: State::Start,
            handler,
            format,
            deprecate_eof,
            status_flags: None,
        }
    }

    /// Server status from the final OK/EOF packet, once seen.
    pub fn status_flags(&self) -> Option<ServerStatusFlags> {
        self.status_flags
    }

    /// Advance with the packet in `buffer_set.read_buffer`.
    ///
    /// On error the exchange is over: server errors and declined LOCAL INFILE requests
    /// leave the connection in sync, everything else does not.
    pub fn step<'buf>(&mut self, buffer_set: &'buf mut BufferSet) -> Result<Action<'buf>> {
        let state = std::mem::replace(&mut self.state, State::Finished);
        match state {
            State::Start => {
                self.state = State::FirstPacket;
                Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
            }

            State::FirstPacket => {
                let payload = &buffer_set.read_buffer[..];
                match payload.first().copied() {
                    None => Err(Error::UnexpectedEof),
                    Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
                    Some(0x00) => {
                        let ok = OkPayload::try_from(OkPayloadBytes(payload))?;
                        self.record_status(ok.status_flags)?;
                        self.handler.no_result_set(ok)?;
                        Ok(Action::Finished)
                    }
                    Some(0xFB) => {
                        let filename = String::from_utf8_lossy(&payload[1..]).into_owned();
                        debug!(%filename, "declining LOCAL INFILE request");
                        self.state = State::DecliningLocalInfile { filename };
                        // An empty packet tells the server no file content follows.
                        Ok(Action::Write(Vec::new()))
                    }
                    Some(_) => {
                        let (count, _) = read_int_lenenc(payload)?;
                        let remaining = usize::try_from(count).map_err(|_| Error::InvalidPacket)?;
                        if remaining == 0 {
                            return Err(Error::InvalidPacket);
                        }
                        self.state = State::Columns {
                            columns: Vec::with_capacity(remaining.min(4096)),
                            remaining,
                        };
                        Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
                    }
                }
            }

            State::Columns {
                mut columns,
                remaining,
            } => {
                let payload = &buffer_set.read_buffer[..];
                columns.push(ColumnDefinition::try_from(ColumnDefinitionBytes(payload))?);
                if remaining > 1 {
                    self.state = State::Columns {
                        columns,
                        remaining: remaining - 1,
                    };
                } else {
                    let columns: Arc<[ColumnDefinition]> = columns.into();
                    self.handler.resultset_start(&columns)?;
                    self.state = if self.deprecate_eof {
                        State::Rows { columns }
                    } else {
                        State::ColumnsEof { columns }
                    };
                }
                Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
            }

            State::ColumnsEof { columns } => {
                let payload = &buffer_set.read_buffer[..];
                if payload.first() != Some(&0xFE) || payload.len() >= 9 {
                    return Err(Error::InvalidPacket);
                }
                self.state = State::Rows { columns };
                Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
            }

            State::Rows { columns } => {
                let payload = &buffer_set.read_buffer[..];
                match payload.first().copied() {
                    None => Err(Error::UnexpectedEof),
                    // A row never starts with 0xFF: neither a lenenc string nor the
                    // binary row header can.
                    Some(0xFF) => Err(ErrPayloadBytes(payload).into()),
                    // A text row starting with 0xFE holds a string of at least 2^24
                    // bytes, so only a short packet can be the terminal one.
                    Some(0xFE) if payload.len() < MAX_PAYLOAD_LEN => {
                        let ok = OkPayload::from_terminal(payload, self.deprecate_eof)?;
                        self.record_status(ok.status_flags)?;
                        self.handler.resultset_end(ok)?;
                        Ok(Action::Finished)
                    }
                    Some(_) => {
                        let values = match self.format {
                            RowFormat::Text => TextRowPayload(payload).decode(columns.len())?,
                            RowFormat::Binary => {
                                BinaryRowPayload::parse(payload, columns.len())?.decode(&columns)?
                            }
                        };
                        self.handler.row(Row::new(Arc::clone(&columns), values))?;
                        self.state = State::Rows { columns };
                        Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
                    }
                }
            }

            State::DecliningLocalInfile { filename } => {
                self.state = State::LocalInfileResult { filename };
                Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
            }

            State::LocalInfileResult { filename } => {
                match read_ok_or_err(&buffer_set.read_buffer) {
                    Ok(ok) => self.record_status(ok.status_flags)?,
                    Err(Error::ServerError(err)) => {
                        debug!(%err, "server answered the declined LOCAL INFILE request");
                    }
                    Err(err) => return Err(err),
                }
                Err(Error::UnsupportedFeature(format!(
                    "LOCAL INFILE request for '{filename}' was declined"
                )))
            }

            State::Finished => Err(Error::LibraryBug(eyre!("result set stepped after finishing"))),
        }
    }

    fn record_status(&mut self, status_flags: ServerStatusFlags) -> Result<()> {
        self.status_flags = Some(status_flags);
        if status_flags.contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS) {
            // Multi-results are never negotiated; the rest of the stream cannot be
            // attributed to a command.
            warn!("server announced additional result sets");
            return Err(Error::InvalidPacket);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constant::ColumnType;
    use crate::protocol::command::column_definition_tests::encode_column;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
        rows: Vec<Row>,
    }

    impl ResultSetHandler for Recorder {
        fn no_result_set(&mut self, ok: OkPayload) -> Result<()> {
            self.events.push(format!("ok {}", ok.affected_rows));
            Ok(())
        }
        fn resultset_start(&mut self, columns: &Arc<[ColumnDefinition]>) -> Result<()> {
            self.events.push(format!("start {}", columns.len()));
            Ok(())
        }
        fn row(&mut self, row: Row) -> Result<()> {
            self.events.push("row".into());
            self.rows.push(row);
            Ok(())
        }
        fn resultset_end(&mut self, _eof: OkPayload) -> Result<()> {
            self.events.push("end".into());
            Ok(())
        }
    }

    /// Feed packets until the machine finishes, returning the writes it requested.
    fn run(
        handler: &mut Recorder,
        format: RowFormat,
        deprecate_eof: bool,
        packets: &[Vec<u8>],
    ) -> Result<Vec<Vec<u8>>> {
        let mut buffer_set = BufferSet::new();
        let mut machine = ResultSet::new(handler, format, deprecate_eof);
        let mut packets = packets.iter();
        let mut writes = Vec::new();
        loop {
            match machine.step(&mut buffer_set)? {
                Action::NeedPacket(buf) => {
                    buf.clear();
                    buf.extend_from_slice(packets.next().expect("ran out of packets"));
                }
                Action::Write(payload) => writes.push(payload),
                Action::Finished => return Ok(writes),
            }
        }
    }

    const TERMINAL_OK: &[u8] = b"\xfe\x00\x00\x02\x00\x00\x00";

    #[test]
    fn test_ok_without_result_set() {
        let mut handler = Recorder::default();
        run(&mut handler, RowFormat::Text, true, &[b"\x00\x05\x00\x02\x00\x00\x00".to_vec()]).unwrap();
        assert_eq!(handler.events, vec!["ok 5"]);
    }

    #[test]
    fn test_text_result_set_with_eof() {
        let mut handler = Recorder::default();
        let packets = vec![
            vec![2],
            encode_column("a", ColumnType::MYSQL_TYPE_LONGLONG, 1, 0),
            encode_column("a", ColumnType::MYSQL_TYPE_VAR_STRING, 4, 0),
            b"\xfe\x00\x00\x02\x00".to_vec(),
            b"\x010\xfb".to_vec(),
            b"\x01\x31\x03foo".to_vec(),
            b"\xfe\x00\x00\x02\x00".to_vec(),
        ];
        run(&mut handler, RowFormat::Text, false, &packets).unwrap();
        assert_eq!(handler.events, vec!["start 2", "row", "row", "end"]);
        assert_eq!(handler.rows[0].values(), &[Value::from("0"), Value::Null]);
        assert_eq!(handler.rows[1].get_by_name("a"), Some(&Value::from("foo")));
    }

    #[test]
    fn test_zero_rows() {
        let mut handler = Recorder::default();
        let packets = vec![
            vec![1],
            encode_column("x", ColumnType::MYSQL_TYPE_LONG, 11, 0),
            TERMINAL_OK.to_vec(),
        ];
        run(&mut handler, RowFormat::Text, true, &packets).unwrap();
        assert_eq!(handler.events, vec!["start 1", "end"]);
    }

    #[test]
    fn test_binary_rows() {
        let mut handler = Recorder::default();
        let mut row = vec![0x00, 0x00];
        row.extend_from_slice(&42u32.to_le_bytes());
        let packets = vec![
            vec![1],
            encode_column("n", ColumnType::MYSQL_TYPE_LONG, 11, 0),
            row,
            TERMINAL_OK.to_vec(),
        ];
        run(&mut handler, RowFormat::Binary, true, &packets).unwrap();
        assert_eq!(handler.rows[0].values(), &[Value::Int(42)]);
    }

    #[test]
    fn test_error_mid_rows() {
        let mut handler = Recorder::default();
        let packets = vec![
            vec![1],
            encode_column("x", ColumnType::MYSQL_TYPE_LONG, 11, 0),
            b"\x011".to_vec(),
            b"\xff\x0d\x05#HY000Query execution was interrupted".to_vec(),
        ];
        let err = run(&mut handler, RowFormat::Text, true, &packets).unwrap_err();
        assert!(!err.is_connection_fatal());
        assert_eq!(handler.events, vec!["start 1", "row"]);
    }

    #[test]
    fn test_local_infile_is_declined() {
        let mut handler = Recorder::default();
        let packets = vec![b"\xfbdata.csv".to_vec(), b"\x00\x00\x00\x02\x00\x00\x00".to_vec()];
        let mut buffer_set = BufferSet::new();
        let mut machine = ResultSet::new(&mut handler, RowFormat::Text, true);
        let mut writes = Vec::new();
        let mut packets = packets.iter();
        let err = loop {
            match machine.step(&mut buffer_set) {
                Ok(Action::NeedPacket(buf)) => {
                    buf.clear();
                    buf.extend_from_slice(packets.next().unwrap());
                }
                Ok(Action::Write(payload)) => writes.push(payload),
                Ok(Action::Finished) => panic!("expected an error"),
                Err(err) => break err,
            }
        };
        assert_eq!(writes, vec![Vec::<u8>::new()]);
        assert!(matches!(err, Error::UnsupportedFeature(ref m) if m.contains("data.csv")));
        assert!(!err.is_connection_fatal());
        assert!(packets.next().is_none());
    }

    #[test]
    fn test_more_results_is_fatal() {
        let mut handler = Recorder::default();
        let err = run(&mut handler, RowFormat::Text, true, &[b"\x00\x00\x00\x0a\x00\x00\x00".to_vec()])
            .unwrap_err();
        assert!(err.is_connection_fatal());
    }
}
