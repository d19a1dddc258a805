//! Sans-io MySQL client protocol: framing, packet codecs and the per-command
//! state machines. Nothing in here performs I/O.

pub mod command;
pub mod connection;
pub mod packet;
pub mod primitive;
pub mod response;
mod row;
pub mod r#trait;
pub mod value;

pub use row::{BinaryRowPayload, TextRowPayload};
pub use r#trait::ResultSetHandler;
