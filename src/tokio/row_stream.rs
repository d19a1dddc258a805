use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::response::OkPayload;
use crate::row::{Row, StreamEvent};

/// Rows of a streaming query, delivered as the connection decodes them.
///
/// Yields every row, then a single [`StreamEvent::End`], then `None`. A failed
/// query yields its error once, then `None`.
///
/// `None` is the only end-of-stream signal: after `End`, after an error, and
/// immediately after [`RowStream::close`], which discards any buffered rows.
///
/// Closing (or dropping) the stream before the query was dispatched cancels it.
/// Closing it while rows are still arriving closes the connection, since the rest
/// of the result can no longer be consumed.
#[derive(Debug)]
pub struct RowStream {
    events: Option<mpsc::UnboundedReceiver<Result<StreamEvent>>>,
}

impl RowStream {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<Result<StreamEvent>>) -> Self {
        Self {
            events: Some(events),
        }
    }

    pub async fn next(&mut self) -> Option<Result<StreamEvent>> {
        let events = self.events.as_mut()?;
        match events.recv().await {
            Some(Ok(StreamEvent::Row(row))) => Some(Ok(StreamEvent::Row(row))),
            Some(Ok(StreamEvent::End(ok))) => {
                self.events = None;
                Some(Ok(StreamEvent::End(ok)))
            }
            Some(Err(err)) => {
                self.events = None;
                Some(Err(err))
            }
            // the driver went away without finishing the result
            None => {
                self.events = None;
                Some(Err(Error::ConnectionClosed))
            }
        }
    }

    /// Stop receiving events. Every later [`RowStream::next`] returns `None`.
    pub fn close(&mut self) {
        self.events = None;
    }

    /// No more events will be yielded.
    pub fn is_finished(&self) -> bool {
        self.events.is_none()
    }

    /// Drain the remaining rows and the final OK packet.
    pub async fn collect_rows(mut self) -> Result<(Vec<Row>, OkPayload)> {
        let mut rows = Vec::new();
        loop {
            match self.next().await {
                Some(Ok(StreamEvent::Row(row))) => rows.push(row),
                Some(Ok(StreamEvent::End(ok))) => return Ok((rows, ok)),
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(Error::BadUsageError(
                        "row stream already finished".to_string(),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rows_then_end_then_none() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = RowStream::new(rx);
        let row = Row::new(Arc::from(Vec::new()), Vec::new());
        tx.send(Ok(StreamEvent::Row(row.clone()))).unwrap();
        tx.send(Ok(StreamEvent::End(OkPayload::default()))).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), StreamEvent::Row(row));
        assert!(matches!(stream.next().await, Some(Ok(StreamEvent::End(_)))));
        assert!(stream.next().await.is_none());
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn test_error_is_yielded_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = RowStream::new(rx);
        tx.send(Err(Error::ConnectionClosed)).unwrap();
        assert!(matches!(stream.next().await, Some(Err(Error::ConnectionClosed))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_sender_dropped_without_end() {
        let (tx, rx) = mpsc::unbounded_channel::<Result<StreamEvent>>();
        let mut stream = RowStream::new(rx);
        drop(tx);
        assert!(matches!(stream.next().await, Some(Err(Error::ConnectionClosed))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_releases_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<Result<StreamEvent>>();
        let mut stream = RowStream::new(rx);
        stream.close();
        assert!(tx.is_closed());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_discards_buffered_rows() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = RowStream::new(rx);
        let row = Row::new(Arc::from(Vec::new()), Vec::new());
        tx.send(Ok(StreamEvent::Row(row.clone()))).unwrap();
        tx.send(Ok(StreamEvent::Row(row.clone()))).unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), StreamEvent::Row(row));
        stream.close();
        assert!(stream.is_finished());
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }
}
