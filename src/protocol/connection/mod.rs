mod handshake;

pub use handshake::{
    AuthExchange, AuthStep, AuthSwitchRequest, CACHING_SHA2_PASSWORD, Handshake, HandshakeConfig,
    HandshakeResponse41, HandshakeResult, InitialHandshake, MYSQL_NATIVE_PASSWORD,
    auth_caching_sha2_password, auth_mysql_native_password, auth_response, read_initial_handshake,
    write_change_user,
};

#[cfg(test)]
pub(crate) use handshake::tests as handshake_tests;
