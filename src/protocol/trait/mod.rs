pub mod param;
pub mod params;

use std::sync::Arc;

use auto_impl::auto_impl;

use crate::col::ColumnDefinition;
use crate::error::Result;
use crate::protocol::response::OkPayload;
use crate::row::Row;

/// Event callbacks for a decoded result.
///
/// Text and binary results drive the same callbacks, so a handler does not care
/// which protocol produced the rows. Exactly one of `no_result_set` or the
/// `resultset_start` .. `resultset_end` sequence is called per command.
#[auto_impl(&mut)]
pub trait ResultSetHandler {
    fn no_result_set(&mut self, ok: OkPayload) -> Result<()>;
    fn resultset_start(&mut self, columns: &Arc<[ColumnDefinition]>) -> Result<()>;
    fn row(&mut self, row: Row) -> Result<()>;
    fn resultset_end(&mut self, eof: OkPayload) -> Result<()>;
}
