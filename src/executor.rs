//! The command queue of one connection.
//!
//! Commands run strictly one at a time in submission order. Only the connection
//! driver dequeues; every command is completed exactly once, either with its
//! result or with a rejection.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::prepared::Statement;
use crate::row::{QueryResult, StreamEvent};
use crate::value::Value;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;
pub(crate) type Events = mpsc::UnboundedSender<Result<StreamEvent>>;

/// A request together with the channel its outcome is delivered on.
#[derive(Debug)]
pub(crate) enum Command {
    Query {
        sql: String,
        params: Vec<Value>,
        reply: Reply<QueryResult>,
    },
    QueryStream {
        sql: String,
        params: Vec<Value>,
        events: Events,
    },
    Prepare {
        sql: String,
        reply: Reply<Statement>,
    },
    Execute {
        statement_id: u32,
        params: Vec<Value>,
        reply: Reply<QueryResult>,
    },
    CloseStatement {
        statement_id: u32,
        reply: Reply<()>,
    },
    Ping {
        reply: Reply<()>,
    },
    InitDb {
        database: String,
        reply: Reply<()>,
    },
    ChangeUser {
        user: String,
        password: String,
        database: Option<String>,
        reply: Reply<()>,
    },
    Quit {
        reply: Reply<()>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Query { .. } => "query",
            Command::QueryStream { .. } => "query_stream",
            Command::Prepare { .. } => "prepare",
            Command::Execute { .. } => "execute",
            Command::CloseStatement { .. } => "close_statement",
            Command::Ping { .. } => "ping",
            Command::InitDb { .. } => "init_db",
            Command::ChangeUser { .. } => "change_user",
            Command::Quit { .. } => "quit",
        }
    }

    /// Nobody waits for the outcome anymore.
    ///
    /// COM_QUIT, COM_STMT_CLOSE and COM_CHANGE_USER change server state, so they are
    /// never considered abandoned.
    pub fn is_abandoned(&self) -> bool {
        match self {
            Command::Query { reply, .. } | Command::Execute { reply, .. } => reply.is_closed(),
            Command::QueryStream { events, .. } => events.is_closed(),
            Command::Prepare { reply, .. } => reply.is_closed(),
            Command::Ping { reply } | Command::InitDb { reply, .. } => reply.is_closed(),
            Command::CloseStatement { .. } | Command::ChangeUser { .. } | Command::Quit { .. } => {
                false
            }
        }
    }

    /// Complete the command with `error` without running it.
    pub fn reject(self, error: Error) {
        match self {
            Command::Query { reply, .. } | Command::Execute { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::QueryStream { events, .. } => {
                let _ = events.send(Err(error));
            }
            Command::Prepare { reply, .. } => {
                let _ = reply.send(Err(error));
            }
            Command::CloseStatement { reply, .. }
            | Command::Ping { reply }
            | Command::InitDb { reply, .. }
            | Command::ChangeUser { reply, .. }
            | Command::Quit { reply } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// FIFO of commands waiting for the connection.
#[derive(Debug, Default)]
pub(crate) struct Executor {
    queue: VecDeque<Command>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, command: Command) -> &Command {
        let idx = self.queue.len();
        self.queue.push_back(command);
        &self.queue[idx]
    }

    pub fn dequeue(&mut self) -> Option<Command> {
        self.queue.pop_front()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Reject every queued command, oldest first.
    pub fn reject_all(&mut self, mut error: impl FnMut() -> Error) {
        while let Some(command) = self.queue.pop_front() {
            command.reject(error());
        }
    }
}
