mod conn;
mod row_stream;
mod stream;

pub use conn::{Conn, ConnectionState};
pub use row_stream::RowStream;
pub use stream::Stream;
