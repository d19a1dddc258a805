mod column_definition;
pub mod prepared;
pub mod resultset;
pub mod text;
pub mod utility;

pub use column_definition::ColumnDefinitionBytes;
pub use column_definition::ColumnDefinitionTail;

#[cfg(test)]
pub(crate) use column_definition::tests as column_definition_tests;

/// Action returned by state machines indicating what I/O operation is needed next
#[derive(Debug)]
pub enum Action<'buf> {
    /// State machine needs the next packet - provides the buffer to fill
    NeedPacket(&'buf mut Vec<u8>),
    /// Send this payload as the next packet of the exchange, then step again
    Write(Vec<u8>),
    /// State machine has finished processing
    Finished,
}
