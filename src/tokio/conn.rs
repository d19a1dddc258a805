use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::{TcpStream, UnixStream};
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::buffer::BufferSet;
use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::error::{Error, Result, eyre};
use crate::executor::{Command, Executor, Reply};
use crate::handler::{CollectHandler, StreamHandler};
use crate::opts::Opts;
use crate::prepared::Statement;
use crate::protocol::command::Action;
use crate::protocol::command::prepared::{
    Prepare, write_close_statement, write_execute, write_prepare,
};
use crate::protocol::command::resultset::{ResultSet, RowFormat};
use crate::protocol::command::text::write_query_with_params;
use crate::protocol::command::utility::{write_init_db, write_ping, write_quit};
use crate::protocol::connection::{
    AuthExchange, AuthStep, Handshake, HandshakeResult, write_change_user,
};
use crate::protocol::packet::SequenceId;
use crate::protocol::response::read_ok_or_err;
use crate::protocol::r#trait::ResultSetHandler;
use crate::row::QueryResult;
use crate::value::Value;

use super::row_stream::RowStream;
use super::stream::{Stream, read_payload, write_payload};

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the server greeting.
    Connecting,
    /// Exchanging the handshake response and authentication packets.
    Authenticating,
    /// No command queued or in flight.
    Idle,
    /// A command is in flight.
    Busy,
    /// `quit()` was called: queued commands still run, new ones are refused.
    Closing,
    /// The socket is gone. Every command fails with [`Error::ConnectionClosed`].
    Closed,
}

struct Shared {
    state: Mutex<ConnectionState>,
    shutdown: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a lifecycle step of a live connection. Never reopens a closing one.
    fn advance(&self, next: ConnectionState) {
        let mut state = self.lock();
        if !matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
            *state = next;
        }
    }

    /// Report Idle unless a submission is already waiting in the channel.
    fn settle_idle(&self, rx: &mpsc::UnboundedReceiver<Command>) {
        let mut state = self.lock();
        if *state == ConnectionState::Busy && rx.is_empty() {
            *state = ConnectionState::Idle;
        }
    }

    fn mark_closed(&self) {
        *self.lock() = ConnectionState::Closed;
    }
}

struct ConnInfo {
    server_version: String,
    connection_id: u32,
    capability_flags: CapabilityFlags,
}

/// Handle to a connection.
///
/// Clones share the connection. Commands from all clones run one at a time in
/// the order they were submitted; submitting never blocks. A command is submitted
/// when its method is called, not when the returned future is first polled, so
/// the futures may be awaited (or spawned) in any order. The connection sends
/// COM_QUIT and shuts down once every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct Conn {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    info: Arc<ConnInfo>,
}

impl Conn {
    /// Create a new MySQL connection from connection options
    pub async fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts: Opts = opts.try_into()?;

        let stream = if let Some(socket_path) = &opts.socket {
            let stream = UnixStream::connect(socket_path).await?;
            Stream::unix(stream)
        } else {
            let host = opts.host.as_ref().ok_or_else(|| {
                Error::BadConfigError("Missing host in connection options".to_string())
            })?;

            let stream = TcpStream::connect((host.as_str(), opts.port)).await?;
            stream.set_nodelay(opts.tcp_nodelay)?;
            Stream::tcp(stream)
        };

        Self::new_with_stream(stream, &opts).await
    }

    /// Create a new MySQL connection with an existing stream
    #[instrument(skip_all)]
    pub async fn new_with_stream(stream: Stream, opts: &Opts) -> Result<Self> {
        if opts.tls && !cfg!(feature = "tls") {
            return Err(Error::BadConfigError(
                "TLS requested but the tls feature is not enabled".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Connecting),
            shutdown: Notify::new(),
        });
        let mut buffer_set = BufferSet::new();
        let (stream, session, server_version) =
            establish(stream, opts, &shared, &mut buffer_set).await?;

        let info = Arc::new(ConnInfo {
            server_version,
            connection_id: session.connection_id,
            capability_flags: session.capability_flags,
        });
        debug!(
            connection_id = info.connection_id,
            server_version = %info.server_version,
            "connected"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        shared.advance(ConnectionState::Idle);
        let driver = Driver {
            stream,
            buffer_set,
            sequence_id: SequenceId::new(),
            executor: Executor::new(),
            rx,
            shared: Arc::clone(&shared),
            session,
        };
        tokio::spawn(driver.run());

        Ok(Self { tx, shared, info })
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.lock()
    }

    pub fn server_version(&self) -> &str {
        &self.info.server_version
    }

    /// Server thread id, as sent in the greeting
    pub fn connection_id(&self) -> u32 {
        self.info.connection_id
    }

    /// Get the negotiated capability flags
    pub fn capability_flags(&self) -> CapabilityFlags {
        self.info.capability_flags
    }

    fn submit(&self, command: Command) -> Result<()> {
        // Sending under the lock orders every submission against quit() and close().
        let mut state = self.shared.lock();
        match *state {
            ConnectionState::Closing => Err(Error::ConnectionClosing),
            ConnectionState::Closed => Err(Error::ConnectionClosed),
            _ => {
                self.tx
                    .send(command)
                    .map_err(|_| Error::ConnectionClosed)?;
                *state = ConnectionState::Busy;
                Ok(())
            }
        }
    }

    fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<T>>,
    ) -> impl Future<Output = Result<T>> + use<T> {
        completion(self.submit(command), rx)
    }

    /// Execute a text protocol query and buffer its result.
    ///
    /// `?` placeholders outside string literals, identifiers and comments are
    /// replaced by `params`, escaped for the session's SQL mode.
    pub fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<QueryResult>> + use<> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
            reply,
        };
        self.request(command, rx)
    }

    /// Execute a text protocol query, receiving rows as they arrive.
    ///
    /// Submission errors are delivered as the first event of the stream.
    pub fn query_stream(&self, sql: &str, params: &[Value]) -> RowStream {
        let (events, rx) = mpsc::unbounded_channel();
        let command = Command::QueryStream {
            sql: sql.to_string(),
            params: params.to_vec(),
            events: events.clone(),
        };
        if let Err(err) = self.submit(command) {
            let _ = events.send(Err(err));
        }
        RowStream::new(rx)
    }

    /// Send a ping to the server to check if the connection is alive
    pub fn ping(&self) -> impl Future<Output = Result<()>> + use<> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Ping { reply }, rx)
    }

    /// Change the default database (COM_INIT_DB)
    pub fn select_db(&self, database: &str) -> impl Future<Output = Result<()>> + use<> {
        let (reply, rx) = oneshot::channel();
        let command = Command::InitDb {
            database: database.to_string(),
            reply,
        };
        self.request(command, rx)
    }

    /// Re-authenticate as another user (COM_CHANGE_USER).
    ///
    /// The server resets the session. A rejected login closes the connection.
    pub fn change_user(
        &self,
        user: &str,
        password: &str,
        database: Option<&str>,
    ) -> impl Future<Output = Result<()>> + use<> {
        let (reply, rx) = oneshot::channel();
        let command = Command::ChangeUser {
            user: user.to_string(),
            password: password.to_string(),
            database: database.map(ToString::to_string),
            reply,
        };
        self.request(command, rx)
    }

    /// Prepare a statement on the server
    pub fn prepare(&self, sql: &str) -> impl Future<Output = Result<Statement>> + use<> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Prepare {
            sql: sql.to_string(),
            reply,
        };
        self.request(command, rx)
    }

    fn check_statement(&self, statement: &Statement) -> Result<()> {
        if statement.connection_id() != self.info.connection_id {
            return Err(Error::BadUsageError(format!(
                "statement {} was prepared on connection {}, not {}",
                statement.id(),
                statement.connection_id(),
                self.info.connection_id
            )));
        }
        Ok(())
    }

    /// Execute a prepared statement (binary protocol) and buffer its result.
    pub fn exec(
        &self,
        statement: &Statement,
        params: &[Value],
    ) -> impl Future<Output = Result<QueryResult>> + use<> {
        let (reply, rx) = oneshot::channel();
        let submitted = self.check_statement(statement).and_then(|()| {
            if params.len() != statement.num_params() {
                return Err(Error::BadUsageError(format!(
                    "statement expects {} parameters, got {}",
                    statement.num_params(),
                    params.len()
                )));
            }
            self.submit(Command::Execute {
                statement_id: statement.id(),
                params: params.to_vec(),
                reply,
            })
        });
        completion(submitted, rx)
    }

    /// Deallocate a prepared statement. The server sends no response.
    pub fn close_statement(
        &self,
        statement: Statement,
    ) -> impl Future<Output = Result<()>> + use<> {
        let (reply, rx) = oneshot::channel();
        let submitted = self.check_statement(&statement).and_then(|()| {
            self.submit(Command::CloseStatement {
                statement_id: statement.id(),
                reply,
            })
        });
        completion(submitted, rx)
    }

    /// Close gracefully: commands submitted before this call run, then COM_QUIT is
    /// sent. Commands submitted after it fail with [`Error::ConnectionClosing`].
    pub fn quit(&self) -> impl Future<Output = Result<()>> + use<> {
        let (reply, rx) = oneshot::channel();
        completion(self.begin_quit(Command::Quit { reply }), rx)
    }

    fn begin_quit(&self, command: Command) -> Result<()> {
        let mut state = self.shared.lock();
        match *state {
            ConnectionState::Closing => return Err(Error::ConnectionClosing),
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            _ => {}
        }
        self.tx.send(command).map_err(|_| Error::ConnectionClosed)?;
        *state = ConnectionState::Closing;
        Ok(())
    }

    /// Close abruptly: the in-flight command and every queued command fail with
    /// [`Error::ConnectionClosed`] and the socket is dropped without COM_QUIT.
    pub fn close(&self) {
        {
            let mut state = self.shared.lock();
            if *state == ConnectionState::Closed {
                return;
            }
            *state = ConnectionState::Closed;
        }
        self.shared.shutdown.notify_one();
    }
}

async fn completion<T>(submitted: Result<()>, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
    submitted?;
    match rx.await {
        Ok(result) => result,
        // dropped in flight by an abrupt close
        Err(_) => Err(Error::ConnectionClosed),
    }
}

/// Per-session protocol state, owned by the driver.
struct Session {
    connection_id: u32,
    capability_flags: CapabilityFlags,
    status_flags: ServerStatusFlags,
    charset: u8,
    auth_plugin: String,
    scramble: Vec<u8>,
    secure_channel: bool,
}

async fn send(
    stream: &mut Stream,
    buffer_set: &mut BufferSet,
    sequence_id: &mut SequenceId,
    payload: &[u8],
) -> Result<()> {
    buffer_set.new_write_buffer().extend_from_slice(payload);
    write_payload(stream, buffer_set, sequence_id).await
}

#[cfg(feature = "tls")]
async fn upgrade(stream: Stream, opts: &Opts) -> Result<Stream> {
    let host = opts.host.as_deref().unwrap_or("localhost");
    Ok(stream.upgrade_to_tls(host).await?)
}

#[cfg(not(feature = "tls"))]
async fn upgrade(_stream: Stream, _opts: &Opts) -> Result<Stream> {
    Err(Error::BadConfigError(
        "TLS requested but the tls feature is not enabled".to_string(),
    ))
}

/// Run the connection phase up to the first command.
async fn establish(
    mut stream: Stream,
    opts: &Opts,
    shared: &Shared,
    buffer_set: &mut BufferSet,
) -> Result<(Stream, Session, String)> {
    let mut sequence_id = SequenceId::new();
    let mut handshake = Handshake::new(opts.handshake_config());

    read_payload(&mut stream, &mut sequence_id, &mut buffer_set.read_buffer).await?;
    shared.advance(ConnectionState::Authenticating);

    let (capability_flags, status_flags) = loop {
        match handshake.drive(&buffer_set.read_buffer)? {
            HandshakeResult::Write(payload) => {
                send(&mut stream, buffer_set, &mut sequence_id, &payload).await?;
            }
            HandshakeResult::SslRequest(payload) => {
                send(&mut stream, buffer_set, &mut sequence_id, &payload).await?;
                stream = upgrade(stream, opts).await?;
                match handshake.resume_after_tls()? {
                    HandshakeResult::Write(payload) => {
                        send(&mut stream, buffer_set, &mut sequence_id, &payload).await?;
                    }
                    other => {
                        return Err(Error::LibraryBug(eyre!(
                            "unexpected {other:?} after the TLS upgrade"
                        )));
                    }
                }
            }
            HandshakeResult::Read => {}
            HandshakeResult::Connected {
                capability_flags,
                status_flags,
            } => break (capability_flags, status_flags),
        }
        read_payload(&mut stream, &mut sequence_id, &mut buffer_set.read_buffer).await?;
    };

    let greeting = handshake
        .greeting()
        .ok_or_else(|| Error::LibraryBug(eyre!("connected without a server greeting")))?;
    let session = Session {
        connection_id: greeting.connection_id,
        capability_flags,
        status_flags,
        charset: opts.charset,
        auth_plugin: greeting.auth_plugin_name.clone(),
        scramble: greeting.auth_plugin_data.clone(),
        secure_channel: stream.is_tls(),
    };
    Ok((stream, session, greeting.server_version.clone()))
}

enum Flow {
    Continue,
    Quit,
    Fatal,
}

fn flow_after(err: &Error) -> Flow {
    if err.is_connection_fatal() {
        warn!(error = %err, "closing connection");
        Flow::Fatal
    } else {
        debug!(error = %err, "command failed");
        Flow::Continue
    }
}

fn complete<T>(reply: Reply<T>, result: Result<T>) -> Flow {
    let flow = match &result {
        Ok(_) => Flow::Continue,
        Err(err) => flow_after(err),
    };
    // the caller may have stopped waiting
    let _ = reply.send(result);
    flow
}

/// The task that owns the socket and runs the command queue.
struct Driver {
    stream: Stream,
    buffer_set: BufferSet,
    sequence_id: SequenceId,
    executor: Executor,
    rx: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
    session: Session,
}

impl Driver {
    async fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let connection_id = self.session.connection_id;
        tokio::select! {
            biased;
            () = shared.shutdown.notified() => {
                debug!(connection_id, "connection closed by caller");
            }
            () = self.serve() => {}
        }
        self.finalize();
    }

    async fn serve(&mut self) {
        loop {
            if self.executor.is_idle() {
                self.shared.settle_idle(&self.rx);
                let Some(command) = self.rx.recv().await else {
                    self.quit_unattended().await;
                    return;
                };
                self.executor.enqueue(command);
            }
            while let Ok(command) = self.rx.try_recv() {
                self.executor.enqueue(command);
            }

            let Some(command) = self.executor.dequeue() else {
                continue;
            };
            if command.is_abandoned() {
                trace!(command = command.name(), "skipping abandoned command");
                continue;
            }

            self.shared.advance(ConnectionState::Busy);
            match self.dispatch(command).await {
                Flow::Continue => {}
                Flow::Quit | Flow::Fatal => return,
            }
        }
    }

    /// Every handle is gone and the queue is drained.
    async fn quit_unattended(&mut self) {
        if *self.shared.lock() == ConnectionState::Closed {
            return;
        }
        debug!("all handles dropped, sending COM_QUIT");
        self.sequence_id.reset();
        write_quit(self.buffer_set.new_write_buffer());
        if let Err(err) = self.write_command().await {
            debug!(error = %err, "failed to send COM_QUIT");
        }
    }

    fn finalize(&mut self) {
        self.shared.mark_closed();
        self.rx.close();
        let pending = self.executor.len();
        self.executor.reject_all(|| Error::ConnectionClosed);
        while let Ok(command) = self.rx.try_recv() {
            command.reject(Error::ConnectionClosed);
        }
        debug!(
            connection_id = self.session.connection_id,
            pending, "connection closed"
        );
    }

    #[instrument(skip_all, fields(command = command.name()))]
    async fn dispatch(&mut self, command: Command) -> Flow {
        self.sequence_id.reset();
        match command {
            Command::Query { sql, params, reply } => {
                let mut handler = CollectHandler::default();
                let result = self.run_query(&sql, &params, &mut handler).await;
                complete(reply, result.map(|()| handler.into_result()))
            }
            Command::QueryStream {
                sql,
                params,
                events,
            } => {
                let mut handler = StreamHandler::new(&events);
                match self.run_query(&sql, &params, &mut handler).await {
                    Ok(()) => Flow::Continue,
                    Err(err) => {
                        let flow = flow_after(&err);
                        let _ = events.send(Err(err));
                        flow
                    }
                }
            }
            Command::Prepare { sql, reply } => {
                let result = self.run_prepare(&sql).await;
                complete(reply, result)
            }
            Command::Execute {
                statement_id,
                params,
                reply,
            } => {
                let mut handler = CollectHandler::default();
                let result = self.run_execute(statement_id, &params, &mut handler).await;
                complete(reply, result.map(|()| handler.into_result()))
            }
            Command::CloseStatement {
                statement_id,
                reply,
            } => {
                write_close_statement(self.buffer_set.new_write_buffer(), statement_id);
                let result = self.write_command().await;
                complete(reply, result)
            }
            Command::Ping { reply } => {
                write_ping(self.buffer_set.new_write_buffer());
                let result = self.run_simple().await;
                complete(reply, result)
            }
            Command::InitDb { database, reply } => {
                write_init_db(self.buffer_set.new_write_buffer(), &database);
                let result = self.run_simple().await;
                complete(reply, result)
            }
            Command::ChangeUser {
                user,
                password,
                database,
                reply,
            } => {
                let result = self
                    .run_change_user(&user, password, database.as_deref())
                    .await;
                complete(reply, result)
            }
            Command::Quit { reply } => {
                write_quit(self.buffer_set.new_write_buffer());
                let result = self.write_command().await;
                debug!("sent COM_QUIT");
                self.shared.mark_closed();
                let _ = reply.send(result);
                Flow::Quit
            }
        }
    }

    fn deprecate_eof(&self) -> bool {
        self.session
            .capability_flags
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    async fn write_command(&mut self) -> Result<()> {
        write_payload(&mut self.stream, &mut self.buffer_set, &mut self.sequence_id).await
    }

    async fn read_packet(&mut self) -> Result<()> {
        read_payload(
            &mut self.stream,
            &mut self.sequence_id,
            &mut self.buffer_set.read_buffer,
        )
        .await
    }

    /// A command answered by a single OK or ERR packet.
    async fn run_simple(&mut self) -> Result<()> {
        self.write_command().await?;
        self.read_packet().await?;
        let ok = read_ok_or_err(&self.buffer_set.read_buffer)?;
        self.session.status_flags = ok.status_flags;
        Ok(())
    }

    async fn run_query<H: ResultSetHandler>(
        &mut self,
        sql: &str,
        params: &[Value],
        handler: &mut H,
    ) -> Result<()> {
        // Binding happens here, so the escaping follows the SQL mode left by the
        // commands that ran before this one.
        let no_backslash_escapes = self
            .session
            .status_flags
            .contains(ServerStatusFlags::SERVER_STATUS_NO_BACKSLASH_ESCAPES);
        write_query_with_params(
            self.buffer_set.new_write_buffer(),
            sql,
            params,
            no_backslash_escapes,
        )?;
        self.write_command().await?;
        self.read_result(handler, RowFormat::Text).await
    }

    async fn run_execute<H: ResultSetHandler>(
        &mut self,
        statement_id: u32,
        params: &[Value],
        handler: &mut H,
    ) -> Result<()> {
        write_execute(self.buffer_set.new_write_buffer(), statement_id, params)?;
        self.write_command().await?;
        self.read_result(handler, RowFormat::Binary).await
    }

    async fn read_result<H: ResultSetHandler>(
        &mut self,
        handler: &mut H,
        format: RowFormat,
    ) -> Result<()> {
        let mut result_set = ResultSet::new(handler, format, self.deprecate_eof());
        let outcome = loop {
            let action = match result_set.step(&mut self.buffer_set) {
                Ok(action) => action,
                Err(err) => break Err(err),
            };
            match action {
                Action::NeedPacket(buffer) => {
                    read_payload(&mut self.stream, &mut self.sequence_id, buffer).await?;
                }
                Action::Write(payload) => {
                    send(
                        &mut self.stream,
                        &mut self.buffer_set,
                        &mut self.sequence_id,
                        &payload,
                    )
                    .await?;
                }
                Action::Finished => break Ok(()),
            }
        };
        if let Some(status_flags) = result_set.status_flags() {
            self.session.status_flags = status_flags;
        }
        outcome
    }

    async fn run_prepare(&mut self, sql: &str) -> Result<Statement> {
        write_prepare(self.buffer_set.new_write_buffer(), sql);
        self.write_command().await?;

        let mut prepare = Prepare::new(self.deprecate_eof(), self.session.connection_id);
        loop {
            match prepare.step(&mut self.buffer_set)? {
                Action::NeedPacket(buffer) => {
                    read_payload(&mut self.stream, &mut self.sequence_id, buffer).await?;
                }
                Action::Write(_) => {
                    return Err(Error::LibraryBug(eyre!("prepare requested a write")));
                }
                Action::Finished => break,
            }
        }
        prepare
            .take_statement()
            .ok_or_else(|| Error::LibraryBug(eyre!("prepare finished without a statement")))
    }

    async fn run_change_user(
        &mut self,
        user: &str,
        password: String,
        database: Option<&str>,
    ) -> Result<()> {
        let mut exchange = AuthExchange::new(
            self.session.auth_plugin.clone(),
            password,
            self.session.scramble.clone(),
            self.session.secure_channel,
        );
        let auth_response = exchange.response()?;
        write_change_user(
            self.buffer_set.new_write_buffer(),
            self.session.capability_flags,
            user,
            &auth_response,
            database,
            self.session.charset,
            exchange.plugin(),
        );
        self.write_command().await?;

        loop {
            self.read_packet().await?;
            match exchange.drive(&self.buffer_set.read_buffer)? {
                AuthStep::Write(payload) => {
                    self.buffer_set.new_write_buffer().extend_from_slice(&payload);
                    self.write_command().await?;
                }
                AuthStep::Read => {}
                AuthStep::Done(ok) => {
                    self.session.status_flags = ok.status_flags;
                    self.session.auth_plugin = exchange.plugin().to_string();
                    debug!(user, "changed user");
                    return Ok(());
                }
            }
        }
    }
}
