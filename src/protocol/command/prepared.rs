//! COM_STMT_PREPARE, COM_STMT_EXECUTE and COM_STMT_CLOSE.
//!
//! The execute response is a regular result set in the binary row format, see
//! [`super::resultset::ResultSet`].

use std::sync::Arc;

use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::buffer::BufferSet;
use crate::col::ColumnDefinition;
use crate::constant::CommandByte;
use crate::error::{Error, Result, eyre};
use crate::prepared::Statement;
use crate::protocol::command::{Action, ColumnDefinitionBytes};
use crate::protocol::packet::ErrPayloadBytes;
use crate::protocol::primitive::*;
use crate::protocol::r#trait::params::Params;

/// Prepared statement OK response
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE command
pub fn write_prepare(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// Read COM_STMT_PREPARE_OK. The caller has already ruled out an ERR packet.
pub fn read_prepare_ok(payload: &[u8]) -> Result<&PrepareOk> {
    let (status, data) = read_int_1(payload)?;
    if status != 0x00 {
        return Err(Error::InvalidPacket);
    }
    let (prepare_ok, _) = PrepareOk::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok(prepare_ok)
}

/// Write COM_STMT_EXECUTE command
pub fn write_execute<P: Params + ?Sized>(out: &mut Vec<u8>, statement_id: u32, params: &P) -> Result<()> {
    write_int_1(out, CommandByte::StmtExecute as u8);
    write_int_4(out, statement_id);

    // CURSOR_TYPE_NO_CURSOR
    write_int_1(out, 0x00);

    // iteration count, always 1
    write_int_4(out, 1);

    if !params.is_empty() {
        params.write_null_bitmap(out);
        // new-params-bound-flag: types are sent on every execution
        write_int_1(out, 0x01);
        params.write_types(out);
        params.write_values(out)?;
    }
    Ok(())
}

/// Write COM_STMT_CLOSE command. The server sends no response.
pub fn write_close_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtClose as u8);
    write_int_4(out, statement_id);
}

struct Pending {
    id: u32,
    warnings: u16,
    params: Vec<ColumnDefinition>,
    num_params: usize,
    columns: Vec<ColumnDefinition>,
    num_columns: usize,
}

enum State {
    Start,
    FirstPacket,
    Params(Pending),
    ParamsEof(Pending),
    Columns(Pending),
    ColumnsEof(Pending),
    Finished,
}

/// State machine for the COM_STMT_PREPARE response.
pub struct Prepare {
    state: State,
    deprecate_eof: bool,
    connection_id: u32,
    statement: Option<Statement>,
}

impl Prepare {
    pub fn new(deprecate_eof: bool, connection_id: u32) -> Self {
        Self {
            state: State::Start,
            deprecate_eof,
            connection_id,
            statement: None,
        }
    }

    /// The prepared statement, once [`Action::Finished`] was returned.
    pub fn take_statement(&mut self) -> Option<Statement> {
        self.statement.take()
    }

    pub fn step<'buf>(&mut self, buffer_set: &'buf mut BufferSet) -> Result<Action<'buf>> {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Start => {
                self.state = State::FirstPacket;
                Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
            }

            State::FirstPacket => {
                let payload = &buffer_set.read_buffer[..];
                if payload.first() == Some(&0xFF) {
                    return Err(ErrPayloadBytes(payload).into());
                }
                let ok = read_prepare_ok(payload)?;
                let num_params = usize::from(ok.num_params());
                let num_columns = usize::from(ok.num_columns());
                let pending = Pending {
                    id: ok.statement_id(),
                    warnings: ok.warning_count(),
                    params: Vec::with_capacity(num_params),
                    num_params,
                    columns: Vec::with_capacity(num_columns),
                    num_columns,
                };
                if num_params > 0 {
                    self.state = State::Params(pending);
                    Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
                } else {
                    self.after_params(pending, buffer_set)
                }
            }

            State::Params(mut pending) => {
                pending
                    .params
                    .push(ColumnDefinition::try_from(ColumnDefinitionBytes(&buffer_set.read_buffer))?);
                if pending.params.len() < pending.num_params {
                    self.state = State::Params(pending);
                    Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
                } else if self.deprecate_eof {
                    self.after_params(pending, buffer_set)
                } else {
                    self.state = State::ParamsEof(pending);
                    Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
                }
            }

            State::ParamsEof(pending) => {
                check_eof(&buffer_set.read_buffer)?;
                self.after_params(pending, buffer_set)
            }

            State::Columns(mut pending) => {
                pending
                    .columns
                    .push(ColumnDefinition::try_from(ColumnDefinitionBytes(&buffer_set.read_buffer))?);
                if pending.columns.len() < pending.num_columns {
                    self.state = State::Columns(pending);
                    Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
                } else if self.deprecate_eof {
                    self.finish(pending)
                } else {
                    self.state = State::ColumnsEof(pending);
                    Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
                }
            }

            State::ColumnsEof(pending) => {
                check_eof(&buffer_set.read_buffer)?;
                self.finish(pending)
            }

            State::Finished => Err(Error::LibraryBug(eyre!("prepare stepped after finishing"))),
        }
    }

    fn after_params<'buf>(
        &mut self,
        pending: Pending,
        buffer_set: &'buf mut BufferSet,
    ) -> Result<Action<'buf>> {
        if pending.num_columns > 0 {
            self.state = State::Columns(pending);
            Ok(Action::NeedPacket(&mut buffer_set.read_buffer))
        } else {
            self.finish(pending)
        }
    }

    fn finish<'buf>(&mut self, pending: Pending) -> Result<Action<'buf>> {
        self.statement = Some(Statement::new(
            pending.id,
            self.connection_id,
            Arc::from(pending.params),
            Arc::from(pending.columns),
            pending.warnings,
        ));
        Ok(Action::Finished)
    }
}

fn check_eof(payload: &[u8]) -> Result<()> {
    if payload.first() == Some(&0xFE) && payload.len() < 9 {
        Ok(())
    } else {
        Err(Error::InvalidPacket)
    }
}
