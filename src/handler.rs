use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::col::ColumnDefinition;
use crate::error::{Error, Result};
use crate::protocol::r#trait::ResultSetHandler;
use crate::protocol::response::OkPayload;
use crate::row::{QueryResult, Row, StreamEvent};

/// Buffers a whole result into a [`QueryResult`].
#[derive(Debug, Default)]
pub struct CollectHandler {
    result: QueryResult,
}

impl CollectHandler {
    pub fn into_result(self) -> QueryResult {
        self.result
    }
}

impl ResultSetHandler for CollectHandler {
    fn no_result_set(&mut self, ok: OkPayload) -> Result<()> {
        self.result.ok = ok;
        Ok(())
    }

    fn resultset_start(&mut self, columns: &Arc<[ColumnDefinition]>) -> Result<()> {
        self.result.columns = Arc::clone(columns);
        Ok(())
    }

    fn row(&mut self, row: Row) -> Result<()> {
        self.result.rows.push(row);
        Ok(())
    }

    fn resultset_end(&mut self, eof: OkPayload) -> Result<()> {
        self.result.ok = eof;
        Ok(())
    }
}

/// Forwards rows to a [`crate::tokio::RowStream`] as they are decoded.
pub struct StreamHandler<'a> {
    events: &'a UnboundedSender<Result<StreamEvent>>,
}

impl<'a> StreamHandler<'a> {
    pub fn new(events: &'a UnboundedSender<Result<StreamEvent>>) -> Self {
        Self { events }
    }
}

impl ResultSetHandler for StreamHandler<'_> {
    fn no_result_set(&mut self, ok: OkPayload) -> Result<()> {
        let _ = self.events.send(Ok(StreamEvent::End(ok)));
        Ok(())
    }

    fn resultset_start(&mut self, _columns: &Arc<[ColumnDefinition]>) -> Result<()> {
        Ok(())
    }

    fn row(&mut self, row: Row) -> Result<()> {
        // The stream was closed mid-result. The remaining rows are still on the
        // wire and nobody will read them.
        self.events
            .send(Ok(StreamEvent::Row(row)))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn resultset_end(&mut self, eof: OkPayload) -> Result<()> {
        let _ = self.events.send(Ok(StreamEvent::End(eof)));
        Ok(())
    }
}
