use std::collections::HashMap;
use std::sync::Arc;

use crate::col::ColumnDefinition;
use crate::constant::ServerStatusFlags;
use crate::protocol::response::OkPayload;
use crate::value::Value;

/// One decoded row together with the columns of its result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnDefinition]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[ColumnDefinition]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value of the last column labelled `name`.
    ///
    /// Results may repeat a label (`SELECT 1 AS a, 2 AS a`); the later column wins,
    /// as it does in [`Row::to_map`].
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let idx = self.columns.iter().rposition(|c| c.name == name)?;
        self.values.get(idx)
    }

    /// Label to value. Repeated labels keep the value of the later column.
    pub fn to_map(&self) -> HashMap<&str, &Value> {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .zip(self.values.iter())
            .collect()
    }
}

/// Outcome of a buffered query: the rows and columns of a result set, or the
/// affected-rows summary of a statement without one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Empty for statements without a result set.
    pub columns: Arc<[ColumnDefinition]>,
    pub rows: Vec<Row>,
    /// The final OK (or EOF) packet of the exchange.
    pub ok: OkPayload,
}

impl QueryResult {
    pub fn has_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn affected_rows(&self) -> u64 {
        self.ok.affected_rows
    }

    pub fn last_insert_id(&self) -> u64 {
        self.ok.last_insert_id
    }

    pub fn warnings(&self) -> u16 {
        self.ok.warnings
    }

    pub fn status_flags(&self) -> ServerStatusFlags {
        self.ok.status_flags
    }

    /// Human-readable info from the OK packet, e.g. "Rows matched: 1  Changed: 1".
    pub fn info(&self) -> &str {
        &self.ok.info
    }
}

/// Delivered by a streaming query: every row in order, then exactly one `End`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Row(Row),
    /// The final OK (or EOF) packet. For statements without a result set this is
    /// the only event.
    End(OkPayload),
}
