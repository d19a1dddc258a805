use tracing::{debug, warn};
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{
    CAPABILITIES_ALWAYS_ENABLED, CAPABILITIES_CONFIGURABLE, CapabilityFlags, CommandByte,
    ServerStatusFlags,
};
use crate::error::{Error, Result, eyre};
use crate::protocol::packet::{ErrPayloadBytes, OkPayloadBytes};
use crate::protocol::primitive::*;
use crate::protocol::response::{ErrPayload, OkPayload};

const MAX_PACKET_SIZE: u32 = 16_777_216;

pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";

#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct HandshakeFixedFields {
    connection_id: U32LE,
    auth_data_part1: [u8; 8],
    filler: u8,
    capability_flags_lower: U16LE,
    charset: u8,
    status_flags: U16LE,
    capability_flags_upper: U16LE,
    auth_data_len: u8,
}

/// The server greeting (Protocol::HandshakeV10).
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub auth_plugin_data: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: String,
}

/// Read initial handshake packet from server
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_int_1(payload)?;

    // The server refuses the connection (too many connections, blocked host).
    if protocol_version == 0xFF {
        return Err(ErrPayloadBytes(payload).into());
    }
    if protocol_version != 10 {
        return Err(Error::UnsupportedFeature(format!(
            "handshake protocol version {protocol_version}"
        )));
    }

    let (server_version, data) = read_string_null(data)?;
    let (fixed, rest) =
        HandshakeFixedFields::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;

    let cap_bits = (u32::from(fixed.capability_flags_upper.get()) << 16)
        | u32::from(fixed.capability_flags_lower.get());
    let capability_flags = CapabilityFlags::from_bits_retain(cap_bits);

    let (_reserved, mut data) = read_string_fix(rest, 10)?;

    let mut auth_plugin_data = fixed.auth_data_part1.to_vec();
    if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        // part 2 is at least 12 bytes plus a NUL terminator
        let part2_len = (fixed.auth_data_len as usize).saturating_sub(9).max(12);
        let (part2, rest) = read_string_fix(data, part2_len)?;
        auth_plugin_data.extend_from_slice(part2);
        data = rest.strip_prefix(&[0]).unwrap_or(rest);
    }

    // Some servers omit the terminator of the plugin name.
    let auth_plugin_name = match data.iter().position(|&b| b == 0) {
        Some(end) => &data[..end],
        None => data,
    };
    let auth_plugin_name = if auth_plugin_name.is_empty() {
        MYSQL_NATIVE_PASSWORD.to_string()
    } else {
        String::from_utf8_lossy(auth_plugin_name).into_owned()
    };

    Ok(InitialHandshake {
        protocol_version,
        server_version: String::from_utf8_lossy(server_version).into_owned(),
        connection_id: fixed.connection_id.get(),
        auth_plugin_data,
        capability_flags,
        charset: fixed.charset,
        status_flags: ServerStatusFlags::from_bits_retain(fixed.status_flags.get()),
        auth_plugin_name,
    })
}

/// Handshake response packet sent by client (HandshakeResponse41)
#[derive(Debug, Clone)]
pub struct HandshakeResponse41<'a> {
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: &'a str,
}

fn write_auth_response(out: &mut Vec<u8>, capability_flags: CapabilityFlags, auth_response: &[u8]) {
    if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
        write_bytes_lenenc(out, auth_response);
    } else if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        write_int_1(out, auth_response.len() as u8);
        out.extend_from_slice(auth_response);
    } else {
        out.extend_from_slice(auth_response);
        out.push(0);
    }
}

/// Write handshake response packet (HandshakeResponse41)
pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse41<'_>) {
    write_ssl_request(out, response.capability_flags, response.charset);
    write_string_null(out, response.username);
    write_auth_response(out, response.capability_flags, response.auth_response);

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        write_string_null(out, response.database.unwrap_or_default());
    }

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH)
    {
        write_string_null(out, response.auth_plugin_name);
    }
}

/// Write SSL request packet, the fixed-size prefix of HandshakeResponse41 sent
/// before upgrading to TLS.
pub fn write_ssl_request(out: &mut Vec<u8>, capability_flags: CapabilityFlags, charset: u8) {
    write_int_4(out, capability_flags.bits());
    write_int_4(out, MAX_PACKET_SIZE);
    write_int_1(out, charset);
    out.extend_from_slice(&[0u8; 23]);
}

/// Write COM_CHANGE_USER command
pub fn write_change_user(
    out: &mut Vec<u8>,
    capability_flags: CapabilityFlags,
    username: &str,
    auth_response: &[u8],
    database: Option<&str>,
    charset: u8,
    auth_plugin_name: &str,
) {
    write_int_1(out, CommandByte::ChangeUser as u8);
    write_string_null(out, username);
    if capability_flags.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
        write_int_1(out, auth_response.len() as u8);
        out.extend_from_slice(auth_response);
    } else {
        out.extend_from_slice(auth_response);
        out.push(0);
    }
    write_string_null(out, database.unwrap_or_default());
    write_int_2(out, u16::from(charset));
    if capability_flags.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
        write_string_null(out, auth_plugin_name);
    }
}

/// Auth switch request from server
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a [u8],
    pub plugin_data: &'a [u8],
}

/// Read auth switch request (0xFE followed by plugin name and data)
pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    let (header, data) = read_int_1(payload)?;
    if header != 0xFE {
        return Err(Error::InvalidPacket);
    }
    let (plugin_name, data) = read_string_null(data)?;
    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data: data.strip_suffix(&[0]).unwrap_or(data),
    })
}

// ============================================================================
// Authentication Plugins
// ============================================================================

/// mysql_native_password authentication
///
/// SHA1(password) XOR SHA1(challenge + SHA1(SHA1(password)))
pub fn auth_mysql_native_password(password: &str, challenge: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};

    if password.is_empty() {
        return [0u8; 20];
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);
    let token = Sha1::new().chain_update(challenge).chain_update(stage2).finalize();

    let mut result = [0u8; 20];
    for (out, (a, b)) in result.iter_mut().zip(stage1.iter().zip(token.iter())) {
        *out = a ^ b;
    }
    result
}

/// caching_sha2_password fast authentication scramble
///
/// SHA256(password) XOR SHA256(SHA256(SHA256(password)) + challenge)
pub fn auth_caching_sha2_password(password: &str, challenge: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    if password.is_empty() {
        return [0u8; 32];
    }

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);
    let scramble = Sha256::new().chain_update(stage2).chain_update(challenge).finalize();

    let mut result = [0u8; 32];
    for (out, (a, b)) in result.iter_mut().zip(stage1.iter().zip(scramble.iter())) {
        *out = a ^ b;
    }
    result
}

/// Scramble `password` for `plugin`.
pub fn auth_response(plugin: &str, password: &str, challenge: &[u8]) -> Result<Vec<u8>> {
    match plugin {
        MYSQL_NATIVE_PASSWORD => {
            if password.is_empty() {
                return Ok(Vec::new());
            }
            Ok(auth_mysql_native_password(password, challenge).to_vec())
        }
        CACHING_SHA2_PASSWORD => {
            if password.is_empty() {
                return Ok(Vec::new());
            }
            Ok(auth_caching_sha2_password(password, challenge).to_vec())
        }
        other => Err(Error::UnsupportedAuthPlugin(other.to_string())),
    }
}

/// Next move in an authentication exchange.
#[derive(Debug)]
pub enum AuthStep {
    /// Send this payload, then read the next packet.
    Write(Vec<u8>),
    /// Read the next packet.
    Read,
    /// Authenticated.
    Done(OkPayload),
}

/// Server-driven part of authentication, after the client's first response.
///
/// Shared by the connection handshake and COM_CHANGE_USER.
#[derive(Debug, Clone)]
pub struct AuthExchange {
    plugin: String,
    password: String,
    challenge: Vec<u8>,
    secure_channel: bool,
}

impl AuthExchange {
    pub fn new(plugin: String, password: String, challenge: Vec<u8>, secure_channel: bool) -> Self {
        Self {
            plugin,
            password,
            challenge,
            secure_channel,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Scrambled password for the current plugin and challenge.
    pub fn response(&self) -> Result<Vec<u8>> {
        auth_response(&self.plugin, &self.password, &self.challenge)
    }

    pub fn drive(&mut self, payload: &[u8]) -> Result<AuthStep> {
        match payload.first().copied() {
            Some(0x00) => Ok(AuthStep::Done(OkPayload::try_from(OkPayloadBytes(payload))?)),
            Some(0xFF) => Err(Error::Authentication(ErrPayload::try_from(ErrPayloadBytes(
                payload,
            ))?)),
            Some(0xFE) => {
                let switch = read_auth_switch_request(payload)?;
                self.plugin = String::from_utf8_lossy(switch.plugin_name).into_owned();
                self.challenge = switch.plugin_data.to_vec();
                debug!(plugin = %self.plugin, "auth switch");
                Ok(AuthStep::Write(self.response()?))
            }
            Some(0x01) if self.plugin == CACHING_SHA2_PASSWORD => match payload.get(1) {
                // fast auth success; the OK packet follows
                Some(0x03) => Ok(AuthStep::Read),
                // full auth: the password itself, acceptable only over TLS
                Some(0x04) if self.secure_channel => {
                    let mut password = self.password.as_bytes().to_vec();
                    password.push(0);
                    Ok(AuthStep::Write(password))
                }
                Some(0x04) => Err(Error::UnsupportedAuthPlugin(
                    "caching_sha2_password full authentication requires TLS".to_string(),
                )),
                _ => Err(Error::InvalidPacket),
            },
            Some(_) => Err(Error::InvalidPacket),
            None => Err(Error::UnexpectedEof),
        }
    }
}

// ============================================================================
// State Machine API for Handshake
// ============================================================================

/// Configuration for handshake
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub charset: u8,
    pub capabilities: CapabilityFlags,
    pub tls: bool,
    pub local_infile: bool,
}

impl HandshakeConfig {
    fn client_capabilities(&self) -> CapabilityFlags {
        let mut caps = CAPABILITIES_ALWAYS_ENABLED | (self.capabilities & CAPABILITIES_CONFIGURABLE);
        if self.database.is_some() {
            caps |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        }
        if self.tls {
            caps |= CapabilityFlags::CLIENT_SSL;
        }
        if self.local_infile {
            caps |= CapabilityFlags::CLIENT_LOCAL_FILES;
        }
        caps
    }
}

/// Result of driving the handshake state machine
#[derive(Debug)]
pub enum HandshakeResult {
    /// Write this packet to the server, then read the next one.
    Write(Vec<u8>),
    /// Write this SSL request, upgrade the stream to TLS, then call
    /// [`Handshake::resume_after_tls`].
    SslRequest(Vec<u8>),
    /// Read the next packet.
    Read,
    /// Handshake complete
    Connected {
        capability_flags: CapabilityFlags,
        status_flags: ServerStatusFlags,
    },
}

enum State {
    Start {
        config: HandshakeConfig,
    },
    WaitingTlsUpgrade {
        config: HandshakeConfig,
        capability_flags: CapabilityFlags,
    },
    Authenticating {
        exchange: AuthExchange,
        capability_flags: CapabilityFlags,
    },
    Connected,
}

/// State machine for the connection phase.
///
/// Pure parsing and packet generation without I/O.
pub struct Handshake {
    state: State,
    greeting: Option<InitialHandshake>,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            state: State::Start { config },
            greeting: None,
        }
    }

    /// The server greeting, once received.
    pub fn greeting(&self) -> Option<&InitialHandshake> {
        self.greeting.as_ref()
    }

    pub fn drive(&mut self, payload: &[u8]) -> Result<HandshakeResult> {
        match std::mem::replace(&mut self.state, State::Connected) {
            State::Start { config } => {
                let greeting = read_initial_handshake(payload)?;
                let server_caps = greeting.capability_flags;
                debug!(
                    server_version = %greeting.server_version,
                    connection_id = greeting.connection_id,
                    plugin = %greeting.auth_plugin_name,
                    "server greeting"
                );

                if !server_caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
                    warn!("server does not support protocol 4.1");
                    return Err(Error::InvalidPacket);
                }
                if config.tls && !server_caps.contains(CapabilityFlags::CLIENT_SSL) {
                    return Err(Error::BadConfigError(
                        "TLS requested but the server does not support it".to_string(),
                    ));
                }

                let capability_flags = config.client_capabilities() & server_caps;
                self.greeting = Some(greeting);

                if config.tls {
                    let mut ssl_request = Vec::new();
                    write_ssl_request(&mut ssl_request, capability_flags, config.charset);
                    self.state = State::WaitingTlsUpgrade {
                        config,
                        capability_flags,
                    };
                    return Ok(HandshakeResult::SslRequest(ssl_request));
                }

                self.respond(config, capability_flags, false)
            }

            State::WaitingTlsUpgrade { .. } => Err(Error::LibraryBug(eyre!(
                "handshake driven while waiting for the TLS upgrade"
            ))),

            State::Authenticating {
                mut exchange,
                capability_flags,
            } => match exchange.drive(payload)? {
                AuthStep::Write(data) => {
                    self.state = State::Authenticating {
                        exchange,
                        capability_flags,
                    };
                    Ok(HandshakeResult::Write(data))
                }
                AuthStep::Read => {
                    self.state = State::Authenticating {
                        exchange,
                        capability_flags,
                    };
                    Ok(HandshakeResult::Read)
                }
                AuthStep::Done(ok) => Ok(HandshakeResult::Connected {
                    capability_flags,
                    status_flags: ok.status_flags,
                }),
            },

            State::Connected => Err(Error::LibraryBug(eyre!("handshake driven after connecting"))),
        }
    }

    /// Continue after the stream has been upgraded to TLS.
    pub fn resume_after_tls(&mut self) -> Result<HandshakeResult> {
        match std::mem::replace(&mut self.state, State::Connected) {
            State::WaitingTlsUpgrade {
                config,
                capability_flags,
            } => self.respond(config, capability_flags, true),
            other => {
                self.state = other;
                Err(Error::LibraryBug(eyre!("no TLS upgrade pending")))
            }
        }
    }

    fn respond(
        &mut self,
        config: HandshakeConfig,
        capability_flags: CapabilityFlags,
        secure_channel: bool,
    ) -> Result<HandshakeResult> {
        let greeting = self
            .greeting
            .as_ref()
            .ok_or_else(|| Error::LibraryBug(eyre!("handshake response before greeting")))?;

        let exchange = AuthExchange::new(
            greeting.auth_plugin_name.clone(),
            config.password.clone(),
            greeting.auth_plugin_data.clone(),
            secure_channel,
        );
        let auth_response = exchange.response()?;

        let mut packet = Vec::new();
        write_handshake_response(
            &mut packet,
            &HandshakeResponse41 {
                capability_flags,
                charset: config.charset,
                username: &config.username,
                auth_response: &auth_response,
                database: config.database.as_deref(),
                auth_plugin_name: exchange.plugin(),
            },
        );

        self.state = State::Authenticating {
            exchange,
            capability_flags,
        };
        Ok(HandshakeResult::Write(packet))
    }
}
