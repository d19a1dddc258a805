//! A scripted MySQL server speaking just enough protocol for one client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use queued_mysql::Opts;
use queued_mysql::constant::{CapabilityFlags, ServerStatusFlags};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

pub const MAX_PAYLOAD_LEN: usize = 0xFF_FFFF;
pub const CONNECTION_ID: u32 = 7;
pub const SERVER_VERSION: &str = "8.0.36-mock";
pub const AUTOCOMMIT: u16 = ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT.bits();

/// What the server does after receiving a packet.
pub enum Reply {
    /// Send these payloads, continuing the sequence of the received packet.
    Packets(Vec<Vec<u8>>),
    /// Send payloads with pauses in between.
    Steps(Vec<Step>),
    /// Write raw bytes, headers included.
    Raw(Vec<u8>),
    /// Send nothing (COM_STMT_CLOSE).
    Silent,
    /// Close the socket.
    Hangup,
}

pub enum Step {
    Packet(Vec<u8>),
    Pause(Duration),
}

pub type Script = Box<dyn FnMut(&[u8]) -> Reply + Send>;

pub struct MockConfig {
    pub capabilities: CapabilityFlags,
    pub auth_plugin: &'static str,
    /// Packets answering each client packet of the authentication phase.
    pub auth_rounds: Vec<Vec<Vec<u8>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            capabilities: server_capabilities(),
            auth_plugin: "mysql_native_password",
            auth_rounds: vec![vec![ok(0, 0, AUTOCOMMIT)]],
        }
    }
}

pub fn server_capabilities() -> CapabilityFlags {
    CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_FOUND_ROWS
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_LOCAL_FILES
        | CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_MULTI_STATEMENTS
        | CapabilityFlags::CLIENT_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_SESSION_TRACK
        | CapabilityFlags::CLIENT_DEPRECATE_EOF
}

/// Everything the server observed.
#[derive(Debug, Default)]
pub struct Log {
    /// Client packets of the authentication phase, the handshake response first.
    pub auth_packets: Vec<Vec<u8>>,
    /// Packets received after the handshake, in order.
    pub commands: Vec<Vec<u8>>,
    /// A command arrived while the previous one was still unanswered.
    pub pipelined: bool,
    pub quit_received: bool,
    pub disconnected: bool,
}

pub struct MockServer {
    addr: SocketAddr,
    log: Arc<Mutex<Log>>,
}

impl MockServer {
    pub async fn start(script: impl FnMut(&[u8]) -> Reply + Send + 'static) -> Self {
        Self::start_with(MockConfig::default(), script).await
    }

    pub async fn start_with(
        config: MockConfig,
        script: impl FnMut(&[u8]) -> Reply + Send + 'static,
    ) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(Mutex::new(Log::default()));
        let server_log = Arc::clone(&log);
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, config, Box::new(script), server_log).await;
        });
        Self { addr, log }
    }

    pub fn opts(&self) -> Opts {
        Opts {
            host: Some(self.addr.ip().to_string()),
            port: self.addr.port(),
            user: "test".to_string(),
            password: Some("1234".to_string()),
            db: Some("test".to_string()),
            ..Opts::default()
        }
    }

    pub fn log<R>(&self, f: impl FnOnce(&Log) -> R) -> R {
        f(&self.log.lock().unwrap())
    }

    pub fn handshake_response(&self) -> Vec<u8> {
        self.log(|log| log.auth_packets.first().cloned().unwrap_or_default())
    }

    /// The COM_QUERY texts received so far.
    pub fn queries(&self) -> Vec<String> {
        self.log(|log| {
            log.commands
                .iter()
                .filter(|c| c.first() == Some(&0x03))
                .map(|c| String::from_utf8_lossy(&c[1..]).into_owned())
                .collect()
        })
    }

    /// Wait until `f` holds for the log, up to one second.
    pub async fn wait_for(&self, f: impl Fn(&Log) -> bool) -> bool {
        for _ in 0..100 {
            if self.log(&f) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

async fn serve(mut stream: TcpStream, config: MockConfig, mut script: Script, log: Arc<Mutex<Log>>) {
    let mut seq = 0u8;
    write_packet(&mut stream, &mut seq, &greeting(&config)).await;

    for round in config.auth_rounds {
        let Some((received, payload)) = read_packet(&mut stream).await else {
            log.lock().unwrap().disconnected = true;
            return;
        };
        log.lock().unwrap().auth_packets.push(payload);
        let mut seq = received.wrapping_add(1);
        for packet in round {
            write_packet(&mut stream, &mut seq, &packet).await;
        }
    }

    loop {
        let Some((received, payload)) = read_packet(&mut stream).await else {
            log.lock().unwrap().disconnected = true;
            return;
        };
        if payload == [0x01] {
            let mut log = log.lock().unwrap();
            log.quit_received = true;
            log.commands.push(payload);
            return;
        }
        log.lock().unwrap().commands.push(payload.clone());

        let reply = script(&payload);
        if !matches!(reply, Reply::Silent | Reply::Hangup) && arrived_early(&stream).await {
            log.lock().unwrap().pipelined = true;
        }

        let mut seq = received.wrapping_add(1);
        match reply {
            Reply::Packets(packets) => {
                for packet in packets {
                    write_packet(&mut stream, &mut seq, &packet).await;
                }
            }
            Reply::Steps(steps) => {
                for step in steps {
                    match step {
                        Step::Packet(packet) => write_packet(&mut stream, &mut seq, &packet).await,
                        Step::Pause(duration) => tokio::time::sleep(duration).await,
                    }
                }
            }
            Reply::Raw(bytes) => {
                let _ = stream.write_all(&bytes).await;
            }
            Reply::Silent => {}
            Reply::Hangup => return,
        }
    }
}

/// Whether the client already sent more bytes before getting an answer.
async fn arrived_early(stream: &TcpStream) -> bool {
    let mut byte = [0u8; 1];
    matches!(
        tokio::time::timeout(Duration::from_millis(10), stream.peek(&mut byte)).await,
        Ok(Ok(n)) if n > 0
    )
}

async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let mut payload = Vec::new();
    loop {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.ok()?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let start = payload.len();
        payload.resize(start + len, 0);
        stream.read_exact(&mut payload[start..]).await.ok()?;
        if len < MAX_PAYLOAD_LEN {
            return Some((header[3], payload));
        }
    }
}

async fn write_packet(stream: &mut TcpStream, seq: &mut u8, payload: &[u8]) {
    let mut rest = payload;
    loop {
        let len = rest.len().min(MAX_PAYLOAD_LEN);
        let mut packet = Vec::with_capacity(len + 4);
        packet.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
        packet.push(*seq);
        packet.extend_from_slice(&rest[..len]);
        *seq = seq.wrapping_add(1);
        if stream.write_all(&packet).await.is_err() {
            return;
        }
        rest = &rest[len..];
        if len < MAX_PAYLOAD_LEN {
            return;
        }
    }
}

// ============================================================================
// Payload builders
// ============================================================================

pub fn lenenc_int(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=250 => out.push(value as u8),
        251..=0xFFFF => {
            out.push(0xFC);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xFF_FFFF => {
            out.push(0xFD);
            out.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
        }
        _ => {
            out.push(0xFE);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

pub fn lenenc_str(out: &mut Vec<u8>, value: &[u8]) {
    lenenc_int(out, value.len() as u64);
    out.extend_from_slice(value);
}

pub fn greeting(config: &MockConfig) -> Vec<u8> {
    let caps = config.capabilities.bits();
    let mut out = vec![10];
    out.extend_from_slice(SERVER_VERSION.as_bytes());
    out.push(0);
    out.extend_from_slice(&CONNECTION_ID.to_le_bytes());
    out.extend_from_slice(b"abcdefgh");
    out.push(0);
    out.extend_from_slice(&(caps as u16).to_le_bytes());
    out.push(45);
    out.extend_from_slice(&AUTOCOMMIT.to_le_bytes());
    out.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    out.push(21);
    out.extend_from_slice(&[0; 10]);
    out.extend_from_slice(b"ijklmnopqrst");
    out.push(0);
    out.extend_from_slice(config.auth_plugin.as_bytes());
    out.push(0);
    out
}

pub fn ok(affected_rows: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
    let mut out = vec![0x00];
    lenenc_int(&mut out, affected_rows);
    lenenc_int(&mut out, last_insert_id);
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// The OK packet that ends a result set when EOF packets are deprecated.
pub fn end(status: u16) -> Vec<u8> {
    let mut out = ok(0, 0, status);
    out[0] = 0xFE;
    out
}

/// Classic EOF packet.
pub fn eof(status: u16) -> Vec<u8> {
    let mut out = vec![0xFE, 0, 0];
    out.extend_from_slice(&status.to_le_bytes());
    out
}

pub fn err(code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut out = vec![0xFF];
    out.extend_from_slice(&code.to_le_bytes());
    out.push(b'#');
    out.extend_from_slice(state.as_bytes());
    out.extend_from_slice(message.as_bytes());
    out
}

pub fn column(name: &str, column_type: u8, column_length: u32, flags: u16) -> Vec<u8> {
    let mut out = Vec::new();
    for s in ["def", "test", "t", "t", name, name] {
        lenenc_str(&mut out, s.as_bytes());
    }
    out.push(0x0c);
    out.extend_from_slice(&45u16.to_le_bytes());
    out.extend_from_slice(&column_length.to_le_bytes());
    out.push(column_type);
    out.extend_from_slice(&flags.to_le_bytes());
    out.push(0);
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn text_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Some(text) => lenenc_str(&mut out, text.as_bytes()),
            None => out.push(0xFB),
        }
    }
    out
}

/// A text result set of VAR_STRING columns, in DEPRECATE_EOF form.
pub fn text_result(columns: &[&str], rows: &[Vec<Option<&str>>]) -> Vec<Vec<u8>> {
    let mut packets = vec![vec![columns.len() as u8]];
    for name in columns {
        packets.push(column(name, 0xFD, 256, 0));
    }
    for row in rows {
        packets.push(text_row(row));
    }
    packets.push(end(AUTOCOMMIT));
    packets
}

/// Answer after a pause.
pub fn delayed(duration: Duration, packets: Vec<Vec<u8>>) -> Reply {
    let mut steps = vec![Step::Pause(duration)];
    steps.extend(packets.into_iter().map(Step::Packet));
    Reply::Steps(steps)
}

/// A packet with a header, for replies that break the framing rules.
pub fn raw_packet(seq: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_le_bytes()[..3].to_vec();
    out.push(seq);
    out.extend_from_slice(payload);
    out
}

/// The SQL text of a COM_QUERY packet.
pub fn query_text(payload: &[u8]) -> Option<&str> {
    match payload.split_first() {
        Some((0x03, sql)) => std::str::from_utf8(sql).ok(),
        _ => None,
    }
}
