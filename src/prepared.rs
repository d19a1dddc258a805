use std::sync::Arc;

use crate::col::ColumnDefinition;

/// A server-side prepared statement.
///
/// Only valid on the connection that prepared it, until closed with
/// [`crate::tokio::Conn::close_statement`].
#[derive(Debug, Clone)]
pub struct Statement {
    id: u32,
    connection_id: u32,
    params: Arc<[ColumnDefinition]>,
    columns: Arc<[ColumnDefinition]>,
    warnings: u16,
}

impl Statement {
    pub(crate) fn new(
        id: u32,
        connection_id: u32,
        params: Arc<[ColumnDefinition]>,
        columns: Arc<[ColumnDefinition]>,
        warnings: u16,
    ) -> Self {
        Self {
            id,
            connection_id,
            params,
            columns,
            warnings,
        }
    }

    /// Server-assigned statement id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Server thread id of the owning connection.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    /// Parameter metadata. Servers usually report every parameter as VAR_STRING.
    pub fn params(&self) -> &[ColumnDefinition] {
        &self.params
    }

    /// Result columns, empty for statements that do not return rows.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }
}
